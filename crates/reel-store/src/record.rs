//! The record store contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use reel_models::{ClipId, ClipRecord, ClipState, ClipStatus, ExportJob, ExportJobId, ProjectId};

use crate::error::StoreResult;

/// Outcome of a generation, written back to the clip record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipResultUpdate {
    pub clip_id: ClipId,
    pub status: ClipStatus,
    pub file_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub duration_secs: Option<f64>,
    pub resolution: Option<String>,
    pub generation_time_secs: Option<f64>,
}

impl ClipResultUpdate {
    /// Snapshot the result fields of a tracked clip.
    pub fn from_state(state: &ClipState) -> Self {
        Self {
            clip_id: state.clip_id.clone(),
            status: state.status,
            file_path: state.output_path.clone(),
            error_message: state.last_error.clone(),
            duration_secs: state.duration_secs,
            resolution: state.resolution.clone(),
            generation_time_secs: state.generation_time_secs(),
        }
    }

    /// Copy the update onto a stored record.
    pub fn apply_to(&self, record: &mut ClipRecord) {
        record.status = self.status;
        record.file_path = self.file_path.clone();
        record.error_message = self.error_message.clone();
        if self.duration_secs.is_some() {
            record.duration_secs = self.duration_secs;
        }
        if self.resolution.is_some() {
            record.resolution = self.resolution.clone();
        }
        if self.generation_time_secs.is_some() {
            record.generation_time_secs = self.generation_time_secs;
        }
        record.updated_at = chrono::Utc::now();
    }
}

/// External persistence for projects' clips and export jobs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_clip(&self, clip_id: &ClipId) -> StoreResult<Option<ClipRecord>>;

    async fn upsert_clip(&self, record: &ClipRecord) -> StoreResult<()>;

    /// Clips of a project ordered by sequence position.
    async fn list_project_clips(&self, project_id: &ProjectId) -> StoreResult<Vec<ClipRecord>>;

    /// Write a generation result. Fails with `NotFound` for an unknown clip.
    async fn update_clip_result(&self, update: &ClipResultUpdate) -> StoreResult<()>;

    async fn get_export_job(&self, job_id: &ExportJobId) -> StoreResult<Option<ExportJob>>;

    async fn upsert_export_job(&self, job: &ExportJob) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::ProviderKind;

    #[test]
    fn test_update_keeps_known_metadata() {
        let mut record = ClipRecord::new("c1", "p1", 0);
        record.duration_secs = Some(6.0);

        let mut state = ClipState::new(ClipId::from_string("c1"), ProviderKind::Minimax);
        state.status = ClipStatus::Failed;
        state.last_error = Some("rejected".into());

        ClipResultUpdate::from_state(&state).apply_to(&mut record);
        assert_eq!(record.status, ClipStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("rejected"));
        assert_eq!(record.duration_secs, Some(6.0));
        assert!(record.file_path.is_none());
    }
}
