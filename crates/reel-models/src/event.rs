//! Pipeline event stream messages.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{ClipId, ClipStatus, ExportJobId, ExportStatus};

/// Event envelope pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Clip status or attempt number changed
    ClipStatusChanged {
        #[serde(rename = "clipId")]
        clip_id: ClipId,
        status: ClipStatus,
        attempt: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Export stage or progress changed
    ExportProgress {
        #[serde(rename = "jobId")]
        job_id: ExportJobId,
        status: ExportStatus,
        /// Overall progress (0-100)
        progress: u8,
        #[serde(rename = "currentStep", skip_serializing_if = "Option::is_none")]
        current_step: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Export reached a terminal state
    ExportFinished {
        #[serde(rename = "jobId")]
        job_id: ExportJobId,
        status: ExportStatus,
        #[serde(rename = "outputPath", skip_serializing_if = "Option::is_none")]
        output_path: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn clip_status(clip_id: ClipId, status: ClipStatus, attempt: u32, error: Option<String>) -> Self {
        PipelineEvent::ClipStatusChanged {
            clip_id,
            status,
            attempt,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn export_progress(
        job_id: ExportJobId,
        status: ExportStatus,
        progress: u8,
        current_step: Option<String>,
    ) -> Self {
        PipelineEvent::ExportProgress {
            job_id,
            status,
            progress,
            current_step,
            timestamp: Utc::now(),
        }
    }

    pub fn export_finished(
        job_id: ExportJobId,
        status: ExportStatus,
        output_path: Option<PathBuf>,
        error: Option<String>,
    ) -> Self {
        PipelineEvent::ExportFinished {
            job_id,
            status,
            output_path,
            error,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = PipelineEvent::clip_status(
            ClipId::from_string("c1"),
            ClipStatus::Generating,
            2,
            None,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "clip_status_changed");
        assert_eq!(json["clipId"], "c1");
        assert_eq!(json["status"], "generating");
        assert!(json.get("error").is_none());
    }
}
