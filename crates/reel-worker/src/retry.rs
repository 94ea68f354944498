//! Retry policy for provider calls.
//!
//! Transient failures back off exponentially (base doubled per retry, capped)
//! with random jitter; every other error kind fails on the spot.

use rand::Rng;
use std::time::Duration;

use reel_providers::ProviderError;

/// Retry and backoff settings for generation attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries (not including the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: 0.25,
        }
    }

    /// Deterministic delays, for tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Whether another attempt may follow a failure after `retries_done` retries.
    pub fn should_retry(&self, error: &ProviderError, retries_done: u32) -> bool {
        error.is_retryable() && retries_done < self.max_retries
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// Delay before retry number `retry`, honoring a provider retry-after hint.
    pub fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        let backoff = self.backoff(retry);
        let jittered = if self.jitter > 0.0 && !backoff.is_zero() {
            let spread = backoff.as_secs_f64() * self.jitter;
            backoff + Duration::from_secs_f64(rand::rng().random_range(0.0..=spread))
        } else {
            backoff
        };
        let hinted = error.retry_after().map_or(jittered, |hint| hint.max(jittered));
        hinted.min(self.max_delay)
    }
}
