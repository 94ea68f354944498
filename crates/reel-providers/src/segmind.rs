//! Segmind (Kling) image-to-video adapter.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use reel_models::{AspectRatio, GeneratedAsset, GenerationMode, GenerationRequest, ProviderKind};

use crate::adapter::{
    describe_asset, first_frame_image, run_with_deadline, GenerationContext, ProviderAdapter,
    StagingPaths,
};
use crate::capabilities::{DurationSupport, ProviderCapabilities};
use crate::download::{download_to_staging, write_to_staging};
use crate::error::{parse_retry_after, ProviderError, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://api.segmind.com";

const MODEL_PATH: &str = "/v1/kling-video-v1";
const DEFAULT_CFG_SCALE: f32 = 0.5;

const CAPABILITIES: ProviderCapabilities = ProviderCapabilities {
    modes: &[GenerationMode::ImageToVideo],
    durations: DurationSupport::OneOf(&[5, 10]),
    aspect_ratios: &[AspectRatio::Landscape, AspectRatio::Portrait, AspectRatio::Square],
    supports_seed: true,
    supports_negative_prompt: true,
    camera_movements: &[],
    max_prompt_chars: 2500,
};

/// Segmind connection settings.
#[derive(Debug, Clone)]
pub struct SegmindConfig {
    pub api_key: String,
    pub base_url: String,
    pub poll_interval: Duration,
}

impl SegmindConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// What the provider handed back for a finished generation.
#[derive(Debug, PartialEq)]
enum VideoOutput {
    Url(String),
    Inline(Vec<u8>),
}

/// Adapter for Segmind's hosted Kling model.
pub struct SegmindAdapter {
    config: SegmindConfig,
    client: reqwest::Client,
}

impl SegmindAdapter {
    pub fn new(config: SegmindConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: SegmindConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    async fn submit(&self, request: &GenerationRequest, image: &Path) -> ProviderResult<VideoOutput> {
        let image = STANDARD.encode(tokio::fs::read(image).await?);
        let params = &request.params;
        let payload = json!({
            "image": image,
            "prompt": request.prompt.trim(),
            "negative_prompt": params.negative_prompt.clone().unwrap_or_default(),
            "duration": params.duration_secs,
            "aspect_ratio": params.aspect_ratio.as_str(),
            "cfg_scale": params.cfg_scale.unwrap_or(DEFAULT_CFG_SCALE),
            "seed": params.seed.map(|s| s as i64).unwrap_or(-1),
        });

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), MODEL_PATH);
        info!(clip_id = %request.clip_id, "Submitting Segmind Kling generation");
        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .json(&payload)
            .send()
            .await?;
        let response = check_response(response).await?;

        if is_video(&response) {
            return Ok(VideoOutput::Inline(response.bytes().await?.to_vec()));
        }

        let body: Value = response.json().await?;
        if let Some(output) = body.get("output") {
            return parse_output(output);
        }
        match body.get("fetch_result").and_then(|v| v.as_str()) {
            Some(fetch_url) => {
                debug!(eta = ?body.get("eta"), "Segmind result pending");
                self.wait_for_result(fetch_url).await
            }
            None => Err(ProviderError::permanent(
                "unexpected response format from Segmind",
            )),
        }
    }

    async fn wait_for_result(&self, fetch_url: &str) -> ProviderResult<VideoOutput> {
        loop {
            let response = self
                .client
                .get(fetch_url)
                .header("x-api-key", &self.config.api_key)
                .send()
                .await?;

            if response.status() == StatusCode::ACCEPTED {
                debug!(fetch_url, "Segmind job still processing");
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            let response = check_response(response).await?;
            if is_video(&response) {
                return Ok(VideoOutput::Inline(response.bytes().await?.to_vec()));
            }

            let body: Value = response.json().await?;
            if let Some(status) = body.get("status").and_then(|s| s.as_str()) {
                if status.eq_ignore_ascii_case("failed") || status.eq_ignore_ascii_case("error") {
                    let reason = body
                        .get("error")
                        .and_then(|e| e.as_str())
                        .unwrap_or("Unknown error");
                    return Err(ProviderError::permanent(format!("Segmind job failed: {}", reason)));
                }
            }
            return match body.get("output") {
                Some(output) => parse_output(output),
                None => Err(ProviderError::permanent("Segmind result carried no output")),
            };
        }
    }

    async fn store(&self, output: VideoOutput, paths: &StagingPaths) -> ProviderResult<u64> {
        match output {
            VideoOutput::Url(url) => download_to_staging(&self.client, &url, paths).await,
            VideoOutput::Inline(bytes) => write_to_staging(&bytes, paths).await,
        }
    }
}

#[async_trait]
impl ProviderAdapter for SegmindAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Segmind
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &CAPABILITIES
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        ctx: &GenerationContext,
    ) -> ProviderResult<GeneratedAsset> {
        self.validate(request)?;
        let paths = ctx.paths(&request.clip_id);

        run_with_deadline(ctx, &request.clip_id, async {
            let image = first_frame_image(request, &paths)
                .await?
                .ok_or_else(|| ProviderError::permanent("Segmind requires a first-frame image"))?;
            let output = self.submit(request, &image).await?;
            self.store(output, &paths).await?;
            Ok(describe_asset(&paths.video, None).await)
        })
        .await
    }
}

fn is_video(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("video/"))
        .unwrap_or(false)
}

/// `output` is a URL, a list of URLs, or base64 video data.
fn parse_output(output: &Value) -> ProviderResult<VideoOutput> {
    let value = match output {
        Value::String(s) => s.as_str(),
        Value::Array(items) => items
            .iter()
            .find_map(|v| v.as_str())
            .ok_or_else(|| ProviderError::permanent("Segmind output list is empty"))?,
        other => {
            return Err(ProviderError::permanent(format!(
                "unexpected Segmind output: {}",
                other
            )))
        }
    };

    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(VideoOutput::Url(value.to_string()));
    }

    let data = match value.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, d)| d).unwrap_or(rest),
        None => value,
    };
    STANDARD
        .decode(data.trim())
        .map(VideoOutput::Inline)
        .map_err(|e| ProviderError::permanent(format!("undecodable Segmind output: {}", e)))
}

async fn check_response(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(ProviderError::from_http_status(status.as_u16(), &message, retry_after))
}
