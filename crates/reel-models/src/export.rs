//! Export job records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{ClipId, ExportJobId, ExportSettings, ProjectId};

/// Export job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    #[default]
    Queued,
    Validating,
    Normalizing,
    Concatenating,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Queued => "queued",
            ExportStatus::Validating => "validating",
            ExportStatus::Normalizing => "normalizing",
            ExportStatus::Concatenating => "concatenating",
            ExportStatus::Finalizing => "finalizing",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
            ExportStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportStatus::Completed | ExportStatus::Failed | ExportStatus::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: ExportStatus) -> bool {
        use ExportStatus::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Failed | Cancelled => true,
            _ => matches!(
                (self, next),
                (Queued, Validating)
                    | (Validating, Normalizing)
                    | (Normalizing, Concatenating)
                    | (Concatenating, Finalizing)
                    | (Finalizing, Completed)
            ),
        }
    }

    /// Pipeline stage for running statuses.
    pub fn stage(&self) -> Option<ExportStage> {
        match self {
            ExportStatus::Validating => Some(ExportStage::Validating),
            ExportStatus::Normalizing => Some(ExportStage::Normalizing),
            ExportStatus::Concatenating => Some(ExportStage::Concatenating),
            ExportStatus::Finalizing => Some(ExportStage::Finalizing),
            _ => None,
        }
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Working stage of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Validating,
    Normalizing,
    Concatenating,
    Finalizing,
}

impl ExportStage {
    pub const ALL: [ExportStage; 4] = [
        ExportStage::Validating,
        ExportStage::Normalizing,
        ExportStage::Concatenating,
        ExportStage::Finalizing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStage::Validating => "validating",
            ExportStage::Normalizing => "normalizing",
            ExportStage::Concatenating => "concatenating",
            ExportStage::Finalizing => "finalizing",
        }
    }

    pub fn status(&self) -> ExportStatus {
        match self {
            ExportStage::Validating => ExportStatus::Validating,
            ExportStage::Normalizing => ExportStatus::Normalizing,
            ExportStage::Concatenating => ExportStatus::Concatenating,
            ExportStage::Finalizing => ExportStatus::Finalizing,
        }
    }

    /// Share of the overall progress bar, in percent.
    fn weight(&self) -> u32 {
        match self {
            ExportStage::Validating => 5,
            ExportStage::Normalizing => 70,
            ExportStage::Concatenating => 20,
            ExportStage::Finalizing => 5,
        }
    }
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-stage progress, each 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct StageProgress {
    pub validating: u8,
    pub normalizing: u8,
    pub concatenating: u8,
    pub finalizing: u8,
}

impl StageProgress {
    pub fn get(&self, stage: ExportStage) -> u8 {
        match stage {
            ExportStage::Validating => self.validating,
            ExportStage::Normalizing => self.normalizing,
            ExportStage::Concatenating => self.concatenating,
            ExportStage::Finalizing => self.finalizing,
        }
    }

    pub fn set(&mut self, stage: ExportStage, value: u8) {
        let value = value.min(100);
        match stage {
            ExportStage::Validating => self.validating = value,
            ExportStage::Normalizing => self.normalizing = value,
            ExportStage::Concatenating => self.concatenating = value,
            ExportStage::Finalizing => self.finalizing = value,
        }
    }

    /// Weighted overall progress (0-100).
    pub fn overall(&self) -> u8 {
        let weighted: u32 = ExportStage::ALL
            .iter()
            .map(|stage| stage.weight() * self.get(*stage) as u32)
            .sum();
        (weighted / 100).min(100) as u8
    }
}

/// Timestamped processing log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Export job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExportJob {
    pub id: ExportJobId,
    pub project_id: ProjectId,
    /// The sequence, in output order
    pub clip_ids: Vec<ClipId>,
    pub settings: ExportSettings,
    pub status: ExportStatus,
    pub progress: StageProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_log: Vec<LogEntry>,
}

impl ExportJob {
    pub fn new(project_id: ProjectId, clip_ids: Vec<ClipId>, settings: ExportSettings) -> Self {
        Self {
            id: ExportJobId::new(),
            project_id,
            clip_ids,
            settings,
            status: ExportStatus::Queued,
            progress: StageProgress::default(),
            current_step: None,
            output_path: None,
            error: None,
            duration_secs: None,
            file_size: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_log: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn overall_progress(&self) -> u8 {
        if self.status == ExportStatus::Completed {
            return 100;
        }
        self.progress.overall()
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.processing_log.push(LogEntry {
            at: Utc::now(),
            message: message.into(),
        });
    }
}
