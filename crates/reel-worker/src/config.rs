//! Pipeline configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reel_providers::{
    MinimaxAdapter, MinimaxConfig, ProviderRegistry, SegmindAdapter, SegmindConfig,
};

use crate::retry::RetryPolicy;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum concurrent provider calls
    pub max_concurrent_generations: usize,
    /// Retries after the first attempt for transient provider failures
    pub max_retries: u32,
    /// Backoff base, doubled per retry
    pub retry_base_delay: Duration,
    /// Backoff cap
    pub retry_max_delay: Duration,
    /// Deadline for one adapter call, including polling and download
    pub provider_deadline: Duration,
    /// Timeout for one FFmpeg invocation
    pub ffmpeg_timeout_secs: u64,
    /// Clips normalized in parallel within one export
    pub normalize_parallelism: usize,
    /// Writable staging area for generated and intermediate files
    pub staging_dir: PathBuf,
    /// Where finished exports are placed
    pub output_dir: PathBuf,
    /// Provider task polling interval
    pub poll_interval: Duration,
    pub minimax: Option<MinimaxConfig>,
    pub segmind: Option<SegmindConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_generations: 3,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(30),
            provider_deadline: Duration::from_secs(300),
            ffmpeg_timeout_secs: 600,
            normalize_parallelism: 2,
            staging_dir: PathBuf::from("./storage/temp"),
            output_dir: PathBuf::from("./storage/outputs"),
            poll_interval: Duration::from_secs(10),
            minimax: None,
            segmind: None,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let poll_interval = Duration::from_secs(env_parse("PROVIDER_POLL_INTERVAL_SECS", 10));

        let minimax = non_empty_env("MINIMAX_API_KEY").map(|key| {
            let mut cfg = MinimaxConfig::new(key).with_poll_interval(poll_interval);
            if let Some(url) = non_empty_env("MINIMAX_BASE_URL") {
                cfg = cfg.with_base_url(url);
            }
            cfg
        });
        let segmind = non_empty_env("SEGMIND_API_KEY").map(|key| {
            let mut cfg = SegmindConfig::new(key).with_poll_interval(poll_interval);
            if let Some(url) = non_empty_env("SEGMIND_BASE_URL") {
                cfg = cfg.with_base_url(url);
            }
            cfg
        });

        Self {
            max_concurrent_generations: env_parse::<usize>("MAX_CONCURRENT_GENERATIONS", 3).max(1),
            max_retries: env_parse("GENERATION_MAX_RETRIES", 3),
            retry_base_delay: Duration::from_secs(env_parse("GENERATION_RETRY_BASE_SECS", 2)),
            retry_max_delay: Duration::from_secs(env_parse("GENERATION_RETRY_MAX_SECS", 30)),
            provider_deadline: Duration::from_secs(env_parse("PROVIDER_DEADLINE_SECS", 300)),
            ffmpeg_timeout_secs: env_parse("FFMPEG_TIMEOUT_SECS", 600),
            normalize_parallelism: env_parse::<usize>("NORMALIZE_PARALLELISM", 2).max(1),
            staging_dir: std::env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            poll_interval,
            minimax,
            segmind,
        }
    }

    /// Create the staging and output directories.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay, self.retry_max_delay)
    }

    /// Adapters for every provider that has credentials configured.
    pub fn provider_registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        if let Some(cfg) = &self.minimax {
            registry.register(Arc::new(MinimaxAdapter::new(cfg.clone())));
        }
        if let Some(cfg) = &self.segmind {
            registry.register(Arc::new(SegmindAdapter::new(cfg.clone())));
        }
        registry
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
