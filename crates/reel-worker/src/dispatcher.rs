//! Generation Dispatcher.
//!
//! Runs generation jobs on a bounded pool, retries transient provider
//! failures with backoff, and reports every transition to the
//! [`ClipStateTracker`] before moving on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn, Instrument};

use reel_media::fs_utils::remove_file_if_exists;
use reel_models::{ClipId, ClipState, GeneratedAsset, GenerationRequest, PipelineEvent};
use reel_providers::{GenerationContext, ProviderAdapter, ProviderRegistry};
use reel_store::{ClipResultUpdate, RecordStore};

use crate::error::DispatchError;
use crate::events::EventBus;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::tracker::ClipStateTracker;

const CANCELLED_BY_CALLER: &str = "cancelled by caller";
const CANCELLED_BY_SHUTDOWN: &str = "dispatcher shut down";

/// Handle to one submitted generation.
#[derive(Debug)]
pub struct JobHandle {
    clip_id: ClipId,
    state: watch::Receiver<ClipState>,
}

impl JobHandle {
    pub fn clip_id(&self) -> &ClipId {
        &self.clip_id
    }

    /// Latest state of the clip.
    pub fn state(&self) -> ClipState {
        self.state.borrow().clone()
    }

    /// Follow state changes of this job.
    pub fn subscribe(&self) -> watch::Receiver<ClipState> {
        self.state.clone()
    }

    /// Wait until the clip reaches a terminal state.
    pub async fn wait(mut self) -> ClipState {
        if let Ok(state) = self.state.wait_for(|s| s.is_terminal()).await {
            return state.clone();
        }
        self.state.borrow().clone()
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub staging_dir: PathBuf,
    pub deadline: Duration,
}

struct CancelSlot {
    job_seq: u64,
    tx: watch::Sender<bool>,
}

struct Inner {
    registry: ProviderRegistry,
    tracker: Arc<ClipStateTracker>,
    store: Arc<dyn RecordStore>,
    events: EventBus,
    retry: RetryPolicy,
    ctx: GenerationContext,
    permits: Arc<Semaphore>,
    cancels: Mutex<HashMap<ClipId, CancelSlot>>,
    next_seq: AtomicU64,
    shutdown: watch::Sender<bool>,
}

/// Bounded, retrying executor for generation requests.
#[derive(Clone)]
pub struct GenerationDispatcher {
    inner: Arc<Inner>,
}

impl GenerationDispatcher {
    pub fn new(
        settings: DispatcherSettings,
        registry: ProviderRegistry,
        tracker: Arc<ClipStateTracker>,
        store: Arc<dyn RecordStore>,
        events: EventBus,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                registry,
                tracker,
                store,
                events,
                retry: settings.retry,
                ctx: GenerationContext::new(settings.staging_dir, settings.deadline),
                permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
                cancels: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    pub fn tracker(&self) -> &Arc<ClipStateTracker> {
        &self.inner.tracker
    }

    /// Accept a request and start it in the background.
    pub fn submit(&self, request: GenerationRequest) -> Result<JobHandle, DispatchError> {
        let inner = &self.inner;
        if *inner.shutdown.borrow() {
            return Err(DispatchError::Shutdown);
        }
        let adapter = inner
            .registry
            .get(request.provider)
            .ok_or(DispatchError::UnknownProvider(request.provider))?;

        let clip_id = request.clip_id.clone();
        let job_seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let state = inner.tracker.register(&clip_id, request.provider, job_seq)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        inner.lock_cancels().insert(
            clip_id.clone(),
            CancelSlot {
                job_seq,
                tx: cancel_tx,
            },
        );

        info!(
            clip_id = %clip_id,
            provider = %request.provider,
            mode = %request.mode(),
            lifecycle = job_seq,
            "Generation request accepted"
        );
        inner.publish(&state.borrow());

        let span = JobLogger::generation(&clip_id).create_span();
        tokio::spawn(Arc::clone(inner).run_job(adapter, request, cancel_rx, job_seq).instrument(span));

        Ok(JobHandle { clip_id, state })
    }

    /// Cancel a clip's generation. A no-op for terminal or unknown clips.
    ///
    /// An attempt already talking to the provider is left to finish; its
    /// result is discarded and no retry follows.
    pub async fn cancel(&self, clip_id: &ClipId) -> Option<ClipState> {
        self.inner.cancel(clip_id, None, CANCELLED_BY_CALLER).await;
        self.inner.tracker.get(clip_id)
    }

    /// Stop accepting work and cancel every live job.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.send_replace(true);
        inner.permits.close();

        let live: Vec<ClipId> = inner.lock_cancels().keys().cloned().collect();
        info!(jobs = live.len(), "Shutting down generation dispatcher");
        for clip_id in live {
            inner.cancel(&clip_id, None, CANCELLED_BY_SHUTDOWN).await;
        }
    }

    /// Number of jobs that have not reached a terminal state.
    pub fn active_jobs(&self) -> usize {
        self.inner.lock_cancels().len()
    }
}

impl Inner {
    async fn run_job(
        self: Arc<Self>,
        adapter: Arc<dyn ProviderAdapter>,
        request: GenerationRequest,
        mut cancel_rx: watch::Receiver<bool>,
        job_seq: u64,
    ) {
        let clip_id = request.clip_id.clone();
        let provider = request.provider.as_str();
        let logger = JobLogger::generation(&clip_id);
        let ctx = self.ctx.for_run(job_seq);
        let mut retries = 0u32;

        loop {
            let Some(permit) = self.acquire_permit(&clip_id, job_seq, &mut cancel_rx).await else {
                break;
            };
            let Some(state) = self.tracker.begin_attempt(&clip_id, job_seq) else {
                break;
            };
            self.publish(&state);
            metrics::record_generation_attempt(provider);
            logger.log_start(&format!("attempt {} via {}", state.attempts, provider));

            let result = adapter
                .generate(&request, &ctx)
                .instrument(tracing::info_span!("attempt", attempt = state.attempts, provider))
                .await;

            match result {
                Ok(asset) => {
                    self.finish_success(&clip_id, job_seq, asset, &logger).await;
                    break;
                }
                Err(e) if self.retry.should_retry(&e, retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for(retries, &e);
                    let message = e.to_string();
                    let Some(state) = self.tracker.record_retry(&clip_id, job_seq, &message) else {
                        break;
                    };
                    self.publish(&state);
                    metrics::record_generation_retry(provider);
                    logger.log_warning(&format!(
                        "attempt {} failed, retry {}/{} in {:?}: {}",
                        state.attempts, retries, self.retry.max_retries, delay, message
                    ));

                    // The pool slot is free for other clips while backing off
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancelled(&mut cancel_rx) => break,
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    logger.log_error(&format!("{} error: {}", e.kind().as_str(), message));
                    if let Some(state) = self.tracker.fail(&clip_id, job_seq, &message) {
                        self.finish(&state).await;
                    }
                    break;
                }
            }
        }

        let mut cancels = self.lock_cancels();
        if cancels.get(&clip_id).map(|slot| slot.job_seq) == Some(job_seq) {
            cancels.remove(&clip_id);
        }
    }

    /// Wait for a pool slot; `None` when the job was cancelled or the pool closed.
    async fn acquire_permit(
        &self,
        clip_id: &ClipId,
        job_seq: u64,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.cancel(clip_id, Some(job_seq), CANCELLED_BY_SHUTDOWN).await;
                    None
                }
            },
            _ = cancelled(cancel_rx) => None,
        }
    }

    async fn finish_success(
        &self,
        clip_id: &ClipId,
        job_seq: u64,
        asset: GeneratedAsset,
        logger: &JobLogger,
    ) {
        match self.tracker.complete(clip_id, job_seq, &asset) {
            Some(state) => {
                logger.log_completion(&format!(
                    "{} after {} attempt(s)",
                    asset.path.display(),
                    state.attempts
                ));
                self.finish(&state).await;
            }
            None => {
                // Cancelled while the call was in flight; the file is this lifecycle's own
                logger.log_warning("discarding result of cancelled generation");
                if let Err(e) = remove_file_if_exists(&asset.path).await {
                    debug!(path = %asset.path.display(), "Could not remove discarded clip: {}", e);
                }
            }
        }
    }

    /// Cancel `lifecycle`, or the clip's current lifecycle when `None`.
    async fn cancel(&self, clip_id: &ClipId, lifecycle: Option<u64>, reason: &str) {
        if let Some(state) = self.tracker.cancel(clip_id, lifecycle, reason) {
            info!(clip_id = %clip_id, reason, "Generation cancelled");
            self.finish(&state).await;
        }
        if let Some(slot) = self.lock_cancels().get(clip_id) {
            if lifecycle.map_or(true, |seq| seq == slot.job_seq) {
                slot.tx.send_replace(true);
            }
        }
    }

    /// Record a terminal state everywhere outside the tracker.
    async fn finish(&self, state: &ClipState) {
        self.publish(state);
        metrics::record_generation_outcome(state.provider.as_str(), state.status.as_str());
        if let Err(e) = self
            .store
            .update_clip_result(&ClipResultUpdate::from_state(state))
            .await
        {
            warn!(clip_id = %state.clip_id, "Failed to persist clip result: {}", e);
        }
    }

    fn publish(&self, state: &ClipState) {
        self.events.publish(PipelineEvent::clip_status(
            state.clip_id.clone(),
            state.status,
            state.attempts,
            state.last_error.clone(),
        ));
    }

    fn lock_cancels(&self) -> std::sync::MutexGuard<'_, HashMap<ClipId, CancelSlot>> {
        self.cancels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolves once cancellation is signalled.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
