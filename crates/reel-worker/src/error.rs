//! Worker error types.

use thiserror::Error;

use reel_media::{ConcatError, MediaError, NormalizationError};
use reel_models::{ClipId, ExportJobId, ExportStage, ProviderKind};
use reel_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Reasons a generation request is refused at submission.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Clip {0} already has a generation in flight")]
    AlreadyInFlight(ClipId),

    #[error("No adapter configured for provider {0}")]
    UnknownProvider(ProviderKind),

    #[error("Dispatcher is shut down")]
    Shutdown,
}

/// Failure inside one export stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Normalize(#[from] NormalizationError),

    #[error(transparent)]
    Concat(#[from] ConcatError),

    #[error("Staging area unavailable: {0}")]
    Staging(#[from] std::io::Error),

    #[error("Finalize failed: {0}")]
    Finalize(#[from] MediaError),
}

/// Why an export job failed.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Clip {clip_id} is not ready for export: {reason}")]
    MissingClip { clip_id: ClipId, reason: String },

    #[error("Invalid clip sequence: {0}")]
    InvalidSequence(String),

    #[error("{stage} stage failed: {source}")]
    StageFailure {
        stage: ExportStage,
        #[source]
        source: StageError,
    },
}

impl ExportError {
    pub fn missing_clip(clip_id: &ClipId, reason: impl Into<String>) -> Self {
        Self::MissingClip {
            clip_id: clip_id.clone(),
            reason: reason.into(),
        }
    }

    pub fn stage(stage: ExportStage, source: impl Into<StageError>) -> Self {
        Self::StageFailure {
            stage,
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Export job not found: {0}")]
    ExportNotFound(ExportJobId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
