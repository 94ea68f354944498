//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding process.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const GENERATION_ATTEMPTS_TOTAL: &str = "reel_generation_attempts_total";
    pub const GENERATION_RETRIES_TOTAL: &str = "reel_generation_retries_total";
    pub const GENERATION_OUTCOMES_TOTAL: &str = "reel_generation_outcomes_total";
    pub const EXPORT_OUTCOMES_TOTAL: &str = "reel_export_outcomes_total";
    pub const EXPORT_STAGE_SECONDS: &str = "reel_export_stage_seconds";
}

pub fn record_generation_attempt(provider: &str) {
    let labels = [("provider", provider.to_string())];
    counter!(names::GENERATION_ATTEMPTS_TOTAL, &labels).increment(1);
}

pub fn record_generation_retry(provider: &str) {
    let labels = [("provider", provider.to_string())];
    counter!(names::GENERATION_RETRIES_TOTAL, &labels).increment(1);
}

pub fn record_generation_outcome(provider: &str, status: &str) {
    let labels = [
        ("provider", provider.to_string()),
        ("status", status.to_string()),
    ];
    counter!(names::GENERATION_OUTCOMES_TOTAL, &labels).increment(1);
}

pub fn record_export_outcome(status: &str) {
    let labels = [("status", status.to_string())];
    counter!(names::EXPORT_OUTCOMES_TOTAL, &labels).increment(1);
}

pub fn record_export_stage(stage: &str, duration_secs: f64) {
    let labels = [("stage", stage.to_string())];
    histogram!(names::EXPORT_STAGE_SECONDS, &labels).record(duration_secs);
}
