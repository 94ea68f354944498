//! Export Job Manager.
//!
//! Drives one export through `Validating → Normalizing → Concatenating →
//! Finalizing`. Cancellation is a flag read between stages and between
//! clips; a clip that is already encoding finishes first. The job's staging
//! directory is removed before any terminal state is published.

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use reel_media::fs_utils::{file_size, move_file, remove_dir_if_exists, remove_file_if_exists};
use reel_media::{ClipConcatenator, ClipNormalizer};
use reel_models::{
    ClipId, ClipRecord, ClipStatus, ExportJob, ExportJobId, ExportSettings, ExportStage,
    ExportStatus, PipelineEvent, ProjectId,
};
use reel_store::RecordStore;

use crate::error::{ExportError, StageError, WorkerError, WorkerResult};
use crate::events::EventBus;
use crate::logging::JobLogger;
use crate::metrics;
use crate::tracker::ClipStateTracker;

const CANCELLED_BY_CALLER: &str = "cancelled by caller";

/// Filesystem and parallelism settings for exports.
#[derive(Debug, Clone)]
pub struct ExportManagerSettings {
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
    pub normalize_parallelism: usize,
}

/// Handle to a running or finished export.
#[derive(Debug)]
pub struct ExportJobHandle {
    job_id: ExportJobId,
    state: watch::Receiver<ExportJob>,
}

impl ExportJobHandle {
    pub fn job_id(&self) -> &ExportJobId {
        &self.job_id
    }

    /// Latest job record.
    pub fn snapshot(&self) -> ExportJob {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExportJob> {
        self.state.clone()
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(mut self) -> ExportJob {
        if let Ok(job) = self.state.wait_for(|job| job.is_terminal()).await {
            return job.clone();
        }
        self.state.borrow().clone()
    }
}

/// Order a project's clip records by timeline position.
///
/// Two records at the same position make the order ambiguous and are
/// rejected rather than tie-broken.
pub fn sequence_from_records(mut records: Vec<ClipRecord>) -> Result<Vec<ClipId>, ExportError> {
    records.sort_by_key(|record| record.sequence_position);
    for pair in records.windows(2) {
        if pair[0].sequence_position == pair[1].sequence_position {
            return Err(ExportError::InvalidSequence(format!(
                "clips {} and {} share sequence position {}",
                pair[0].id, pair[1].id, pair[0].sequence_position
            )));
        }
    }
    Ok(records.into_iter().map(|record| record.id).collect())
}

struct JobSlot {
    state: Arc<watch::Sender<ExportJob>>,
    cancel: watch::Sender<bool>,
}

struct Inner {
    settings: ExportManagerSettings,
    normalizer: Arc<dyn ClipNormalizer>,
    concatenator: Arc<dyn ClipConcatenator>,
    tracker: Arc<ClipStateTracker>,
    store: Arc<dyn RecordStore>,
    events: EventBus,
    jobs: RwLock<HashMap<ExportJobId, JobSlot>>,
}

/// Runs export jobs and answers status queries about them.
#[derive(Clone)]
pub struct ExportJobManager {
    inner: Arc<Inner>,
}

impl ExportJobManager {
    pub fn new(
        settings: ExportManagerSettings,
        normalizer: Arc<dyn ClipNormalizer>,
        concatenator: Arc<dyn ClipConcatenator>,
        tracker: Arc<ClipStateTracker>,
        store: Arc<dyn RecordStore>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                normalizer,
                concatenator,
                tracker,
                store,
                events,
                jobs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create a job in `Queued` and start it in the background.
    pub async fn start(
        &self,
        project_id: ProjectId,
        clip_ids: Vec<ClipId>,
        settings: ExportSettings,
    ) -> ExportJobHandle {
        let mut job = ExportJob::new(project_id, clip_ids, settings);
        job.log(format!("Export queued with {} clips", job.clip_ids.len()));
        let job_id = job.id.clone();

        let (state_tx, state_rx) = watch::channel(job.clone());
        let state_tx = Arc::new(state_tx);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.inner.write_jobs().insert(
            job_id.clone(),
            JobSlot {
                state: Arc::clone(&state_tx),
                cancel: cancel_tx,
            },
        );

        info!(
            job_id = %job_id,
            project_id = %job.project_id,
            clips = job.clip_ids.len(),
            "Export job queued"
        );
        self.inner.persist(&job).await;
        self.inner.publish_progress(&job);

        let logger = JobLogger::export(&job_id);
        let run = ExportRun {
            staging: self
                .inner
                .settings
                .staging_dir
                .join(format!("export-{}", job_id)),
            inner: Arc::clone(&self.inner),
            state: state_tx,
            cancel: cancel_rx,
            logger: logger.clone(),
        };
        tokio::spawn(run.run().instrument(logger.create_span()));

        ExportJobHandle {
            job_id,
            state: state_rx,
        }
    }

    /// Export every clip of a project in timeline order.
    pub async fn start_project(
        &self,
        project_id: ProjectId,
        settings: ExportSettings,
    ) -> WorkerResult<ExportJobHandle> {
        let records = self.inner.store.list_project_clips(&project_id).await?;
        let clip_ids = sequence_from_records(records)?;
        Ok(self.start(project_id, clip_ids, settings).await)
    }

    /// Current job record, from memory or the record store.
    pub async fn status(&self, job_id: &ExportJobId) -> WorkerResult<ExportJob> {
        if let Some(slot) = self.inner.read_jobs().get(job_id) {
            return Ok(slot.state.borrow().clone());
        }
        self.inner
            .store
            .get_export_job(job_id)
            .await?
            .ok_or_else(|| WorkerError::ExportNotFound(job_id.clone()))
    }

    pub fn subscribe(&self, job_id: &ExportJobId) -> Option<watch::Receiver<ExportJob>> {
        self.inner
            .read_jobs()
            .get(job_id)
            .map(|slot| slot.state.subscribe())
    }

    /// Ask a job to stop at its next checkpoint. A no-op for finished jobs.
    pub async fn cancel(&self, job_id: &ExportJobId) -> WorkerResult<ExportJob> {
        {
            let jobs = self.inner.read_jobs();
            if let Some(slot) = jobs.get(job_id) {
                let job = slot.state.borrow().clone();
                if !job.is_terminal() {
                    info!(job_id = %job_id, status = %job.status, "Export cancellation requested");
                    slot.cancel.send_replace(true);
                }
                return Ok(job);
            }
        }
        self.status(job_id).await
    }
}

impl Inner {
    /// Write the job to the record store; `false` if the write failed.
    async fn persist(&self, job: &ExportJob) -> bool {
        match self.store.upsert_export_job(job).await {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %job.id, "Failed to persist export job: {}", e);
                false
            }
        }
    }

    fn publish_progress(&self, job: &ExportJob) {
        self.events.publish(PipelineEvent::export_progress(
            job.id.clone(),
            job.status,
            job.overall_progress(),
            job.current_step.clone(),
        ));
    }

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ExportJobId, JobSlot>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ExportJobId, JobSlot>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Why a run stopped before completing.
enum Interrupt {
    Cancelled,
    Failed(ExportError),
}

impl From<ExportError> for Interrupt {
    fn from(e: ExportError) -> Self {
        Interrupt::Failed(e)
    }
}

/// One execution of an export job.
struct ExportRun {
    inner: Arc<Inner>,
    state: Arc<watch::Sender<ExportJob>>,
    cancel: watch::Receiver<bool>,
    staging: PathBuf,
    logger: JobLogger,
}

impl ExportRun {
    async fn run(self) {
        self.logger.log_start(&format!("staging in {}", self.staging.display()));
        let outcome = self.execute().await;

        if let Err(e) = remove_dir_if_exists(&self.staging).await {
            warn!(staging = %self.staging.display(), "Failed to clean export staging: {}", e);
        }

        let (status, error) = match outcome {
            Ok(()) => (ExportStatus::Completed, None),
            Err(Interrupt::Cancelled) => (ExportStatus::Cancelled, Some(CANCELLED_BY_CALLER.to_string())),
            Err(Interrupt::Failed(e)) => (ExportStatus::Failed, Some(e.to_string())),
        };
        if status != ExportStatus::Completed {
            self.remove_output().await;
        }

        // The terminal record is stored and announced before waiters wake
        let mut job = self.snapshot();
        if !job.status.can_transition_to(status) {
            return;
        }
        job.status = status;
        job.error = error.clone();
        job.current_step = None;
        job.completed_at = Some(Utc::now());
        match &error {
            Some(message) => job.log(format!("Export {}: {}", status, message)),
            None => job.log("Export completed"),
        }

        match &error {
            Some(message) if status == ExportStatus::Failed => self.logger.log_error(message),
            Some(message) => self.logger.log_warning(message),
            None => self.logger.log_completion(&format!(
                "{} ({} bytes)",
                job.output_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                job.file_size.unwrap_or(0)
            )),
        }
        metrics::record_export_outcome(status.as_str());
        let persisted = self.inner.persist(&job).await;
        self.inner.publish_progress(&job);
        self.inner.events.publish(PipelineEvent::export_finished(
            job.id.clone(),
            job.status,
            job.output_path.clone(),
            job.error.clone(),
        ));
        let job_id = job.id.clone();
        self.state.send_replace(job);

        // Finished jobs are served from the record store from here on
        if persisted {
            self.inner.write_jobs().remove(&job_id);
        }
    }

    async fn execute(&self) -> Result<(), Interrupt> {
        let job = self.snapshot();

        let started = self.enter(ExportStage::Validating).await?;
        let inputs = self
            .validate(&job.clip_ids)
            .instrument(stage_span(ExportStage::Validating))
            .await?;
        self.finish_stage(ExportStage::Validating, started).await;

        let started = self.enter(ExportStage::Normalizing).await?;
        let normalized = self
            .normalize(&inputs, &job.settings)
            .instrument(stage_span(ExportStage::Normalizing))
            .await?;
        self.finish_stage(ExportStage::Normalizing, started).await;

        let started = self.enter(ExportStage::Concatenating).await?;
        let joined = self
            .staging
            .join(format!("joined.{}", job.settings.format.extension()));
        let concat = self
            .inner
            .concatenator
            .concatenate(&normalized, &joined)
            .instrument(stage_span(ExportStage::Concatenating))
            .await
            .map_err(|e| ExportError::stage(ExportStage::Concatenating, e))?;
        self.logger.log_progress(&format!(
            "joined {} clips, {:.2}s (expected {:.2}s)",
            normalized.len(),
            concat.duration_secs,
            concat.expected_duration_secs
        ));
        self.finish_stage(ExportStage::Concatenating, started).await;

        let started = self.enter(ExportStage::Finalizing).await?;
        let output = self.inner.settings.output_dir.join(format!(
            "{}_{}.{}",
            job.project_id,
            job.id,
            job.settings.format.extension()
        ));
        self.finalize(&concat.path, &output, concat.duration_secs)
            .instrument(stage_span(ExportStage::Finalizing))
            .await?;
        self.finish_stage(ExportStage::Finalizing, started).await;

        Ok(())
    }

    /// Resolve every clip id to a completed clip's file.
    async fn validate(&self, clip_ids: &[ClipId]) -> Result<Vec<(ClipId, PathBuf)>, Interrupt> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = clip_ids.iter().find(|id| !seen.insert(*id)) {
            return Err(ExportError::InvalidSequence(format!(
                "clip {} appears more than once",
                duplicate
            ))
            .into());
        }

        let total = clip_ids.len().max(1);
        let mut inputs = Vec::with_capacity(clip_ids.len());
        for (index, clip_id) in clip_ids.iter().enumerate() {
            self.check_cancel()?;
            let path = self.completed_clip_path(clip_id).await?;
            debug!(clip_id = %clip_id, path = %path.display(), "Clip ready for export");
            inputs.push((clip_id.clone(), path));
            self.set_progress(ExportStage::Validating, index + 1, total, None)
                .await;
        }
        Ok(inputs)
    }

    async fn completed_clip_path(&self, clip_id: &ClipId) -> Result<PathBuf, ExportError> {
        let (status, path) = match self.inner.tracker.get(clip_id) {
            Some(state) => (state.status, state.output_path),
            None => match self.inner.store.get_clip(clip_id).await {
                Ok(Some(record)) => (record.status, record.file_path),
                Ok(None) => return Err(ExportError::missing_clip(clip_id, "unknown clip")),
                Err(e) => {
                    return Err(ExportError::missing_clip(
                        clip_id,
                        format!("clip record unavailable: {}", e),
                    ))
                }
            },
        };

        if status != ClipStatus::Completed {
            return Err(ExportError::missing_clip(clip_id, format!("status is {}", status)));
        }
        let Some(path) = path else {
            return Err(ExportError::missing_clip(clip_id, "no output file recorded"));
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ExportError::missing_clip(
                clip_id,
                format!("output file {} does not exist", path.display()),
            ));
        }
        Ok(path)
    }

    /// Normalize every input with bounded parallelism, keeping sequence order.
    async fn normalize(
        &self,
        inputs: &[(ClipId, PathBuf)],
        settings: &ExportSettings,
    ) -> Result<Vec<PathBuf>, Interrupt> {
        tokio::fs::create_dir_all(&self.staging)
            .await
            .map_err(|e| ExportError::stage(ExportStage::Normalizing, StageError::Staging(e)))?;

        let profile = settings.profile();
        let extension = settings.format.extension();
        let parallelism = self.inner.settings.normalize_parallelism.max(1);
        let total = inputs.len();
        let stop = AtomicBool::new(false);

        let work: Vec<(usize, PathBuf, PathBuf)> = inputs
            .iter()
            .enumerate()
            .map(|(index, (clip_id, input))| {
                let output = self
                    .staging
                    .join(format!("{:03}_{}.{}", index, clip_id, extension));
                (index, input.clone(), output)
            })
            .collect();

        let profile = &profile;
        let stop = &stop;
        let mut results = stream::iter(work)
            .map(|(index, input, output)| async move {
                // Clips not yet started are skipped once the job is stopping
                if stop.load(Ordering::SeqCst) || self.is_cancelled() {
                    return (index, None);
                }
                let result = self
                    .inner
                    .normalizer
                    .normalize(&input, &output, profile)
                    .await;
                (index, Some(result))
            })
            .buffer_unordered(parallelism);

        let mut outputs: Vec<Option<PathBuf>> = vec![None; total];
        let mut interrupt: Option<Interrupt> = None;
        let mut done = 0;
        while let Some((index, result)) = results.next().await {
            match result {
                Some(Ok(clip)) => {
                    done += 1;
                    if clip.passthrough {
                        debug!(clip = index, "Clip already matched the profile");
                    }
                    outputs[index] = Some(clip.path);
                    self.set_progress(
                        ExportStage::Normalizing,
                        done,
                        total,
                        Some(format!("Normalized {}/{} clips", done, total)),
                    )
                    .await;
                }
                Some(Err(e)) => {
                    stop.store(true, Ordering::SeqCst);
                    if interrupt.is_none() {
                        interrupt = Some(ExportError::stage(ExportStage::Normalizing, e).into());
                    }
                }
                None => {
                    stop.store(true, Ordering::SeqCst);
                    interrupt.get_or_insert(Interrupt::Cancelled);
                }
            }
        }

        if let Some(interrupt) = interrupt {
            return Err(interrupt);
        }
        self.check_cancel()?;
        Ok(outputs.into_iter().flatten().collect())
    }

    async fn finalize(&self, joined: &Path, output: &Path, duration_secs: f64) -> Result<(), Interrupt> {
        move_file(joined, output)
            .await
            .map_err(|e| ExportError::stage(ExportStage::Finalizing, e))?;
        self.update(|job| job.output_path = Some(output.to_path_buf()))
            .await;

        let size = file_size(output)
            .await
            .map_err(|e| ExportError::stage(ExportStage::Finalizing, e))?;
        self.update(|job| {
            job.duration_secs = Some(duration_secs);
            job.file_size = Some(size);
            job.progress.set(ExportStage::Finalizing, 100);
            job.log(format!("Output written to {}", output.display()));
        })
        .await;
        Ok(())
    }

    /// Checkpoint, then move into `stage`.
    async fn enter(&self, stage: ExportStage) -> Result<Instant, Interrupt> {
        self.check_cancel()?;
        let job = self
            .transition(stage.status(), |job| {
                if job.started_at.is_none() {
                    job.started_at = Some(Utc::now());
                }
                job.current_step = Some(stage_step(stage).to_string());
                job.log(format!("Stage {} started", stage));
            })
            .ok_or(Interrupt::Cancelled)?;

        info!(stage = %stage, progress = job.overall_progress(), "Export stage started");
        self.inner.persist(&job).await;
        self.inner.publish_progress(&job);
        Ok(Instant::now())
    }

    async fn finish_stage(&self, stage: ExportStage, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_export_stage(stage.as_str(), elapsed);
        self.update(|job| {
            job.progress.set(stage, 100);
            job.log(format!("Stage {} finished in {:.2}s", stage, elapsed));
        })
        .await;
    }

    async fn set_progress(&self, stage: ExportStage, done: usize, total: usize, step: Option<String>) {
        let percent = (done * 100 / total.max(1)).min(100) as u8;
        self.update(|job| {
            job.progress.set(stage, percent);
            if step.is_some() {
                job.current_step = step;
            }
        })
        .await;
    }

    /// Apply a non-status change, then persist and publish it.
    async fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut ExportJob),
    {
        self.state.send_modify(change);
        let job = self.snapshot();
        self.inner.persist(&job).await;
        self.inner.publish_progress(&job);
    }

    /// Move to `next` if the lifecycle allows it.
    fn transition<F>(&self, next: ExportStatus, change: F) -> Option<ExportJob>
    where
        F: FnOnce(&mut ExportJob),
    {
        let mut applied = None;
        self.state.send_if_modified(|job| {
            if !job.status.can_transition_to(next) {
                return false;
            }
            job.status = next;
            change(job);
            applied = Some(job.clone());
            true
        });
        applied
    }

    async fn remove_output(&self) {
        let output = self.snapshot().output_path;
        if let Some(path) = output {
            if let Err(e) = remove_file_if_exists(&path).await {
                warn!(path = %path.display(), "Failed to remove partial export: {}", e);
            }
            self.state.send_modify(|job| job.output_path = None);
        }
    }

    fn snapshot(&self) -> ExportJob {
        self.state.borrow().clone()
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn check_cancel(&self) -> Result<(), Interrupt> {
        if self.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }
}

fn stage_span(stage: ExportStage) -> tracing::Span {
    tracing::info_span!("stage", stage = stage.as_str())
}

fn stage_step(stage: ExportStage) -> &'static str {
    match stage {
        ExportStage::Validating => "Validating clips",
        ExportStage::Normalizing => "Normalizing clips",
        ExportStage::Concatenating => "Joining clips",
        ExportStage::Finalizing => "Writing output",
    }
}
