//! Fakes shared by the pipeline tests.
//!
//! Fake clip files hold their duration in seconds as text, so the fake
//! normalizer and concatenator can report real durations without ffmpeg.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reel_media::{
    ClipConcatenator, ClipNormalizer, ConcatError, ConcatOutput, NormalizationError, NormalizedClip,
};
use reel_models::{
    AspectRatio, ClipRecord, GeneratedAsset, GenerationMode, GenerationRequest,
    NormalizationProfile, ProviderKind,
};
use reel_providers::{
    DurationSupport, GenerationContext, ProviderAdapter, ProviderCapabilities, ProviderError,
    ProviderRegistry, ProviderResult,
};
use reel_store::MemoryStore;
use reel_worker::{ClipPipeline, PipelineConfig};

static CAPABILITIES: ProviderCapabilities = ProviderCapabilities {
    modes: &[
        GenerationMode::TextToVideo,
        GenerationMode::ImageToVideo,
        GenerationMode::SubjectToVideo,
    ],
    durations: DurationSupport::Range { min: 1, max: 60 },
    aspect_ratios: &[AspectRatio::Landscape, AspectRatio::Portrait, AspectRatio::Square],
    supports_seed: true,
    supports_negative_prompt: true,
    camera_movements: &[],
    max_prompt_chars: 5000,
};

/// Outcome of one scripted provider call.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Transient,
    Permanent,
    Unauthorized,
    Succeed,
}

/// Provider adapter that plays back a fixed list of outcomes, then succeeds.
pub struct ScriptedAdapter {
    kind: ProviderKind,
    script: Mutex<VecDeque<Step>>,
    latency: Duration,
    calls: AtomicU32,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(kind: ProviderKind, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            kind,
            script: Mutex::new(steps.into_iter().collect()),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls ever running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &CAPABILITIES
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        ctx: &GenerationContext,
    ) -> ProviderResult<GeneratedAsset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Succeed);
        self.active.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Transient => Err(ProviderError::transient("HTTP 503: upstream busy")),
            Step::Permanent => Err(ProviderError::permanent("HTTP 400: prompt rejected")),
            Step::Unauthorized => Err(ProviderError::unauthorized("HTTP 401: bad key")),
            Step::Succeed => {
                let paths = ctx.paths(&request.clip_id);
                tokio::fs::create_dir_all(&ctx.staging_dir).await.unwrap();
                let duration = request.params.duration_secs as f64;
                tokio::fs::write(&paths.video, duration.to_string()).await.unwrap();
                let mut asset = GeneratedAsset::new(paths.video);
                asset.duration_secs = Some(duration);
                asset.width = Some(1280);
                asset.height = Some(720);
                Ok(asset)
            }
        }
    }
}

/// Copies inputs to outputs, optionally slowly or failing for one input.
#[derive(Default)]
pub struct FakeNormalizer {
    delay: Duration,
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl FakeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail any input whose file name contains `needle`.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipNormalizer for FakeNormalizer {
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        _profile: &NormalizationProfile,
    ) -> Result<NormalizedClip, NormalizationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let name = input.to_string_lossy();
        if let Some(needle) = &self.fail_on {
            if name.contains(needle.as_str()) {
                // Leave a partial file behind, as a crashed encoder would
                tokio::fs::write(output, b"partial").await.unwrap();
                return Err(NormalizationError::unsupported(input, "no video stream"));
            }
        }

        let duration = read_duration(input)
            .await
            .ok_or_else(|| NormalizationError::unsupported(input, "unreadable"))?;
        tokio::fs::copy(input, output).await.unwrap();
        Ok(NormalizedClip {
            path: output.to_path_buf(),
            duration_secs: duration,
            passthrough: false,
        })
    }
}

/// Writes the summed input durations to the output.
#[derive(Default)]
pub struct FakeConcatenator {
    pub joined: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl ClipConcatenator for FakeConcatenator {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<ConcatOutput, ConcatError> {
        if inputs.is_empty() {
            return Err(ConcatError::EmptySequence);
        }
        let mut total = 0.0;
        for input in inputs {
            total += read_duration(input)
                .await
                .ok_or_else(|| ConcatError::write_failure(format!("cannot read {}", input.display())))?;
        }
        tokio::fs::write(output, total.to_string()).await?;
        *self.joined.lock().unwrap() = inputs.to_vec();
        Ok(ConcatOutput {
            path: output.to_path_buf(),
            duration_secs: total,
            expected_duration_secs: total,
        })
    }
}

pub async fn read_duration(path: &Path) -> Option<f64> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    text.trim().parse().ok()
}

/// Write a fake clip of `secs` seconds.
pub async fn write_clip(dir: &Path, name: &str, secs: f64) -> PathBuf {
    let path = dir.join(format!("{}.mp4", name));
    tokio::fs::write(&path, secs.to_string()).await.unwrap();
    path
}

/// Completed clip record pointing at a fake clip file.
pub async fn completed_record(dir: &Path, id: &str, position: u32, secs: f64) -> ClipRecord {
    let path = write_clip(dir, id, secs).await;
    ClipRecord::new(id, "p1", position).completed(path)
}

/// Config rooted in `root`, with millisecond backoff.
pub fn test_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        retry_base_delay: Duration::from_millis(20),
        retry_max_delay: Duration::from_millis(200),
        provider_deadline: Duration::from_secs(5),
        staging_dir: root.join("staging"),
        output_dir: root.join("outputs"),
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub pipeline: ClipPipeline,
    pub store: Arc<MemoryStore>,
    pub normalizer: Arc<FakeNormalizer>,
    pub concatenator: Arc<FakeConcatenator>,
    pub config: PipelineConfig,
}

pub fn harness(
    config: PipelineConfig,
    adapter: Arc<ScriptedAdapter>,
    store: MemoryStore,
    normalizer: FakeNormalizer,
) -> Harness {
    let registry = ProviderRegistry::new().with(adapter);
    let store = Arc::new(store);
    let normalizer = Arc::new(normalizer);
    let concatenator = Arc::new(FakeConcatenator::default());
    let pipeline = ClipPipeline::with_parts(
        &config,
        registry,
        normalizer.clone(),
        concatenator.clone(),
        store.clone(),
    );
    Harness {
        pipeline,
        store,
        normalizer,
        concatenator,
        config,
    }
}

/// Files left anywhere under `dir`.
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
