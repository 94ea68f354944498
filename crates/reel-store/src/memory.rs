//! In-process record store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use reel_models::{ClipId, ClipRecord, ExportJob, ExportJobId, ProjectId};

use crate::error::{StoreError, StoreResult};
use crate::record::{ClipResultUpdate, RecordStore};

/// Record store kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clips: RwLock<HashMap<ClipId, ClipRecord>>,
    export_jobs: RwLock<HashMap<ExportJobId, ExportJob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with clip records.
    pub async fn with_clips(self, records: impl IntoIterator<Item = ClipRecord>) -> Self {
        {
            let mut clips = self.clips.write().await;
            for record in records {
                clips.insert(record.id.clone(), record);
            }
        }
        self
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_clip(&self, clip_id: &ClipId) -> StoreResult<Option<ClipRecord>> {
        Ok(self.clips.read().await.get(clip_id).cloned())
    }

    async fn upsert_clip(&self, record: &ClipRecord) -> StoreResult<()> {
        self.clips
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_project_clips(&self, project_id: &ProjectId) -> StoreResult<Vec<ClipRecord>> {
        let mut records: Vec<ClipRecord> = self
            .clips
            .read()
            .await
            .values()
            .filter(|r| &r.project_id == project_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.sequence_position
                .cmp(&b.sequence_position)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(records)
    }

    async fn update_clip_result(&self, update: &ClipResultUpdate) -> StoreResult<()> {
        let mut clips = self.clips.write().await;
        let record = clips
            .get_mut(&update.clip_id)
            .ok_or_else(|| StoreError::not_found(format!("clip {}", update.clip_id)))?;
        update.apply_to(record);
        debug!(clip_id = %update.clip_id, status = %update.status, "Clip record updated");
        Ok(())
    }

    async fn get_export_job(&self, job_id: &ExportJobId) -> StoreResult<Option<ExportJob>> {
        Ok(self.export_jobs.read().await.get(job_id).cloned())
    }

    async fn upsert_export_job(&self, job: &ExportJob) -> StoreResult<()> {
        self.export_jobs
            .write()
            .await
            .insert(job.id.clone(), job.clone());
        Ok(())
    }
}
