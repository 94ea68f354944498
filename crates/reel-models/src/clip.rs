//! Clip lifecycle state and persisted clip records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{ClipId, ProjectId, ProviderKind};

/// Generation status of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    /// Accepted, waiting for a generation slot
    #[default]
    Pending,
    /// An adapter call is in progress (possibly a retry)
    Generating,
    /// Output file available
    Completed,
    /// Retries exhausted or non-retryable error
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Pending => "pending",
            ClipStatus::Generating => "generating",
            ClipStatus::Completed => "completed",
            ClipStatus::Failed => "failed",
            ClipStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClipStatus::Completed | ClipStatus::Failed | ClipStatus::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// `Generating -> Generating` is the retry self-loop.
    pub fn can_transition_to(&self, next: ClipStatus) -> bool {
        use ClipStatus::*;
        matches!(
            (self, next),
            (Pending, Generating)
                | (Pending, Cancelled)
                | (Generating, Generating)
                | (Generating, Completed)
                | (Generating, Failed)
                | (Generating, Cancelled)
        )
    }
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live generation state of one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipState {
    pub clip_id: ClipId,
    pub provider: ProviderKind,
    pub status: ClipStatus,
    /// Number of adapter calls started so far
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ClipState {
    pub fn new(clip_id: ClipId, provider: ProviderKind) -> Self {
        Self {
            clip_id,
            provider,
            status: ClipStatus::Pending,
            attempts: 0,
            last_error: None,
            output_path: None,
            duration_secs: None,
            resolution: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock generation time once the clip has finished.
    pub fn generation_time_secs(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Clip record as held by the external record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipRecord {
    pub id: ClipId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    pub status: ClipStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Position on the project timeline
    pub sequence_position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_time_secs: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl ClipRecord {
    pub fn new(id: impl Into<ClipId>, project_id: impl Into<ProjectId>, sequence_position: u32) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: String::new(),
            prompt: String::new(),
            provider: None,
            status: ClipStatus::Pending,
            file_path: None,
            duration_secs: None,
            resolution: None,
            sequence_position,
            error_message: None,
            generation_time_secs: None,
            updated_at: Utc::now(),
        }
    }

    /// Record marked completed with an existing output file.
    pub fn completed(mut self, file_path: impl Into<PathBuf>) -> Self {
        self.status = ClipStatus::Completed;
        self.file_path = Some(file_path.into());
        self
    }
}
