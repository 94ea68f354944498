//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors from the ffmpeg/ffprobe layer.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True when the input itself cannot be read as a video.
    pub fn is_unreadable_input(&self) -> bool {
        matches!(
            self,
            MediaError::FileNotFound(_)
                | MediaError::FfprobeFailed { .. }
                | MediaError::JsonParse(_)
                | MediaError::InvalidVideo(_)
        )
    }
}

/// Normalization failure for one clip.
#[derive(Debug, Error)]
pub enum NormalizationError {
    /// Corrupt or unreadable input. Fatal for that clip.
    #[error("Unsupported input {path}: {reason}")]
    UnsupportedInput { path: PathBuf, reason: String },

    /// Encoder exited non-zero (after the internal retry).
    #[error("Encode failed for {path}: {message}")]
    EncodeFailure {
        path: PathBuf,
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },
}

impl NormalizationError {
    pub fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnsupportedInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn encode_failure(path: impl Into<PathBuf>, err: MediaError) -> Self {
        let path = path.into();
        match err {
            MediaError::FfmpegFailed {
                message,
                stderr,
                exit_code,
            } => Self::EncodeFailure {
                path,
                message,
                stderr,
                exit_code,
            },
            other => Self::EncodeFailure {
                path,
                message: other.to_string(),
                stderr: None,
                exit_code: None,
            },
        }
    }
}

/// Concatenation failure.
#[derive(Debug, Error)]
pub enum ConcatError {
    #[error("Nothing to concatenate: the sequence is empty")]
    EmptySequence,

    #[error("Stream mismatch at clip {index} ({path}): expected {expected}, found {found}")]
    StreamMismatch {
        index: usize,
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Failed to write concatenated output: {0}")]
    WriteFailure(String),
}

impl ConcatError {
    pub fn write_failure(message: impl Into<String>) -> Self {
        Self::WriteFailure(message.into())
    }
}

impl From<std::io::Error> for ConcatError {
    fn from(e: std::io::Error) -> Self {
        ConcatError::WriteFailure(e.to_string())
    }
}
