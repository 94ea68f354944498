//! The pipeline's inbound surface.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;

use reel_media::{ClipConcatenator, ClipNormalizer, FfmpegConcatenator, FfmpegNormalizer};
use reel_models::{
    ClipId, ClipState, ExportJob, ExportJobId, ExportSettings, GenerationRequest, PipelineEvent,
    ProjectId,
};
use reel_providers::ProviderRegistry;
use reel_store::RecordStore;

use crate::config::PipelineConfig;
use crate::dispatcher::{DispatcherSettings, GenerationDispatcher, JobHandle};
use crate::error::{DispatchError, WorkerResult};
use crate::events::EventBus;
use crate::export::{ExportJobHandle, ExportJobManager, ExportManagerSettings};
use crate::tracker::ClipStateTracker;

/// Generation, status and export operations over one shared state.
#[derive(Clone)]
pub struct ClipPipeline {
    tracker: Arc<ClipStateTracker>,
    dispatcher: GenerationDispatcher,
    exports: ExportJobManager,
    events: EventBus,
}

impl ClipPipeline {
    /// Pipeline with the configured providers and the FFmpeg media stages.
    pub fn new(config: &PipelineConfig, store: Arc<dyn RecordStore>) -> Self {
        Self::with_parts(
            config,
            config.provider_registry(),
            Arc::new(FfmpegNormalizer::new().with_timeout(config.ffmpeg_timeout_secs)),
            Arc::new(FfmpegConcatenator::new().with_timeout(config.ffmpeg_timeout_secs)),
            store,
        )
    }

    /// Pipeline with explicit adapters and media stages.
    pub fn with_parts(
        config: &PipelineConfig,
        registry: ProviderRegistry,
        normalizer: Arc<dyn ClipNormalizer>,
        concatenator: Arc<dyn ClipConcatenator>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let tracker = Arc::new(ClipStateTracker::new());
        let events = EventBus::default();

        let dispatcher = GenerationDispatcher::new(
            DispatcherSettings {
                max_concurrent: config.max_concurrent_generations,
                retry: config.retry_policy(),
                staging_dir: config.staging_dir.clone(),
                deadline: config.provider_deadline,
            },
            registry,
            Arc::clone(&tracker),
            Arc::clone(&store),
            events.clone(),
        );
        let exports = ExportJobManager::new(
            ExportManagerSettings {
                staging_dir: config.staging_dir.clone(),
                output_dir: config.output_dir.clone(),
                normalize_parallelism: config.normalize_parallelism,
            },
            normalizer,
            concatenator,
            Arc::clone(&tracker),
            store,
            events.clone(),
        );

        Self {
            tracker,
            dispatcher,
            exports,
            events,
        }
    }

    pub fn request_generation(&self, request: GenerationRequest) -> Result<JobHandle, DispatchError> {
        self.dispatcher.submit(request)
    }

    /// State of a clip generated by this process.
    pub fn get_clip_status(&self, clip_id: &ClipId) -> Option<ClipState> {
        self.tracker.get(clip_id)
    }

    /// Drop finished clips older than `max_age` from memory.
    ///
    /// Their results stay in the record store, which export validation
    /// falls back to.
    pub fn prune_finished_clips(&self, max_age: std::time::Duration) -> usize {
        let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        self.tracker.prune_finished(cutoff)
    }

    /// Cancel a generation; terminal and unknown clips are left alone.
    pub async fn cancel_generation(&self, clip_id: &ClipId) -> Option<ClipState> {
        self.dispatcher.cancel(clip_id).await
    }

    pub async fn start_export(
        &self,
        project_id: ProjectId,
        clip_ids: Vec<ClipId>,
        settings: ExportSettings,
    ) -> ExportJobHandle {
        self.exports.start(project_id, clip_ids, settings).await
    }

    pub async fn get_export_status(&self, job_id: &ExportJobId) -> WorkerResult<ExportJob> {
        self.exports.status(job_id).await
    }

    pub async fn cancel_export(&self, job_id: &ExportJobId) -> WorkerResult<ExportJob> {
        self.exports.cancel(job_id).await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn dispatcher(&self) -> &GenerationDispatcher {
        &self.dispatcher
    }

    pub fn exports(&self) -> &ExportJobManager {
        &self.exports
    }

    /// Refuse new generations and cancel the ones still running.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
