//! Clip State Tracker.
//!
//! One `watch` channel per clip holds the authoritative [`ClipState`].
//! Transitions are applied with `send_if_modified`, which serializes writers
//! per clip and validates the move against the lifecycle table. Readers take
//! a snapshot of the latest value and never wait for a writer of another clip.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::debug;

use reel_models::{ClipId, ClipState, ClipStatus, GeneratedAsset, ProviderKind};

use crate::error::DispatchError;

#[derive(Debug)]
struct Lifecycle {
    id: u64,
    tx: watch::Sender<ClipState>,
}

/// Authoritative lifecycle state for every clip seen by this process.
#[derive(Debug, Default)]
pub struct ClipStateTracker {
    clips: RwLock<HashMap<ClipId, Lifecycle>>,
}

impl ClipStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a clip.
    pub fn get(&self, clip_id: &ClipId) -> Option<ClipState> {
        self.read_map()
            .get(clip_id)
            .map(|entry| entry.tx.borrow().clone())
    }

    /// Follow a clip's state changes.
    pub fn subscribe(&self, clip_id: &ClipId) -> Option<watch::Receiver<ClipState>> {
        self.read_map().get(clip_id).map(|entry| entry.tx.subscribe())
    }

    /// All tracked clips.
    pub fn snapshot(&self) -> Vec<ClipState> {
        self.read_map()
            .values()
            .map(|entry| entry.tx.borrow().clone())
            .collect()
    }

    /// Forget terminal clips that finished before `cutoff`.
    ///
    /// Returns how many entries were dropped. Live clips are never touched.
    pub fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut clips = self.write_map();
        let before = clips.len();
        clips.retain(|_, entry| {
            let state = entry.tx.borrow();
            !(state.is_terminal() && state.finished_at.is_some_and(|at| at < cutoff))
        });
        before - clips.len()
    }

    /// Start lifecycle `lifecycle` for `clip_id` in `Pending`.
    ///
    /// A clip that is still `Pending` or `Generating` is refused; a terminal
    /// clip is replaced by a fresh lifecycle.
    pub(crate) fn register(
        &self,
        clip_id: &ClipId,
        provider: ProviderKind,
        lifecycle: u64,
    ) -> Result<watch::Receiver<ClipState>, DispatchError> {
        let mut clips = self.write_map();

        if let Some(existing) = clips.get(clip_id) {
            if !existing.tx.borrow().is_terminal() {
                return Err(DispatchError::AlreadyInFlight(clip_id.clone()));
            }
        }

        let (tx, rx) = watch::channel(ClipState::new(clip_id.clone(), provider));
        clips.insert(clip_id.clone(), Lifecycle { id: lifecycle, tx });
        Ok(rx)
    }

    /// Enter `Generating` for a new attempt. Returns `None` once the
    /// lifecycle is terminal or has been replaced.
    pub(crate) fn begin_attempt(&self, clip_id: &ClipId, lifecycle: u64) -> Option<ClipState> {
        self.transition(clip_id, Some(lifecycle), ClipStatus::Generating, |state| {
            state.attempts += 1;
            if state.started_at.is_none() {
                state.started_at = Some(Utc::now());
            }
        })
    }

    /// Note a failed attempt that will be retried.
    pub(crate) fn record_retry(
        &self,
        clip_id: &ClipId,
        lifecycle: u64,
        error: &str,
    ) -> Option<ClipState> {
        self.transition(clip_id, Some(lifecycle), ClipStatus::Generating, |state| {
            state.last_error = Some(error.to_string());
        })
    }

    pub(crate) fn complete(
        &self,
        clip_id: &ClipId,
        lifecycle: u64,
        asset: &GeneratedAsset,
    ) -> Option<ClipState> {
        self.transition(clip_id, Some(lifecycle), ClipStatus::Completed, |state| {
            state.output_path = Some(asset.path.clone());
            state.duration_secs = asset.duration_secs;
            state.resolution = asset.resolution();
            state.last_error = None;
            state.finished_at = Some(Utc::now());
        })
    }

    pub(crate) fn fail(&self, clip_id: &ClipId, lifecycle: u64, error: &str) -> Option<ClipState> {
        self.transition(clip_id, Some(lifecycle), ClipStatus::Failed, |state| {
            state.last_error = Some(error.to_string());
            state.finished_at = Some(Utc::now());
        })
    }

    /// Cancel `lifecycle`, or whichever lifecycle is current when `None`.
    pub(crate) fn cancel(
        &self,
        clip_id: &ClipId,
        lifecycle: Option<u64>,
        reason: &str,
    ) -> Option<ClipState> {
        self.transition(clip_id, lifecycle, ClipStatus::Cancelled, |state| {
            state.last_error = Some(reason.to_string());
            state.finished_at = Some(Utc::now());
        })
    }

    /// Apply `update` and move to `next` if the lifecycle allows it.
    fn transition<F>(
        &self,
        clip_id: &ClipId,
        lifecycle: Option<u64>,
        next: ClipStatus,
        update: F,
    ) -> Option<ClipState>
    where
        F: FnOnce(&mut ClipState),
    {
        let clips = self.read_map();
        let entry = clips.get(clip_id)?;
        if lifecycle.is_some_and(|id| id != entry.id) {
            debug!(clip_id = %clip_id, to = %next, "Ignoring transition from a replaced lifecycle");
            return None;
        }

        let mut applied = None;
        entry.tx.send_if_modified(|state| {
            if !state.status.can_transition_to(next) {
                return false;
            }
            let previous = state.status;
            state.status = next;
            update(state);
            debug!(
                clip_id = %clip_id,
                from = %previous,
                to = %next,
                attempt = state.attempts,
                "Clip state transition"
            );
            applied = Some(state.clone());
            true
        });
        applied
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ClipId, Lifecycle>> {
        self.clips
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ClipId, Lifecycle>> {
        self.clips
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
