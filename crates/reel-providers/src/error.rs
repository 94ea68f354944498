//! Provider error classification.

use std::time::Duration;
use thiserror::Error;

use reel_media::MediaError;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Coarse error class that drives the dispatcher's retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Transient,
    Permanent,
    Unauthorized,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Transient => "transient",
            ProviderErrorKind::Permanent => "permanent",
            ProviderErrorKind::Unauthorized => "unauthorized",
        }
    }
}

/// Errors returned by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limit, timeout, 5xx. Retryable.
    #[error("Transient provider error: {message}")]
    Transient {
        message: String,
        /// Provider-suggested wait before the next attempt
        retry_after: Option<Duration>,
    },

    /// Bad request or unsupported parameters. Not retryable.
    #[error("Permanent provider error: {0}")]
    Permanent(String),

    /// Bad or expired credentials. Not retryable; needs an operator.
    #[error("Provider rejected credentials: {0}")]
    Unauthorized(String),
}

impl ProviderError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient {
            message: msg.into(),
            retry_after: None,
        }
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Map an HTTP error status to an error kind.
    ///
    /// 401/403 are credential problems, 408/429/5xx are worth retrying,
    /// every other status is a request the provider will never accept.
    pub fn from_http_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = format!("HTTP {}: {}", status, truncate(body, 500));
        match status {
            401 | 403 => Self::Unauthorized(message),
            408 | 429 | 500..=599 => Self::Transient {
                message,
                retry_after,
            },
            _ => Self::Permanent(message),
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Transient { .. } => ProviderErrorKind::Transient,
            ProviderError::Permanent(_) => ProviderErrorKind::Permanent,
            ProviderError::Unauthorized(_) => ProviderErrorKind::Unauthorized,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_http_status(status.as_u16(), &e.to_string(), None);
        }
        if e.is_connect() || e.is_timeout() || e.is_body() || e.is_request() {
            return Self::transient(format!("network error: {}", e));
        }
        if e.is_decode() {
            return Self::permanent(format!("unexpected response format: {}", e));
        }
        if e.is_builder() {
            return Self::permanent(format!("invalid request: {}", e));
        }
        Self::transient(e.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        Self::transient(format!("staging I/O error: {}", e))
    }
}

impl From<MediaError> for ProviderError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::FfmpegFailed { .. } | MediaError::Timeout(_) | MediaError::Io(_) => {
                Self::transient(format!("frame extraction failed: {}", e))
            }
            other => Self::permanent(format!("frame extraction failed: {}", other)),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
