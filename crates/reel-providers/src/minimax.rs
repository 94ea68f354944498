//! MiniMax video generation adapter.
//!
//! Generation is asynchronous on the provider side: a submit call returns a
//! task id, the task is polled until it completes, then the video URL is
//! downloaded into staging.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use reel_models::{AspectRatio, GeneratedAsset, GenerationMode, GenerationRequest, ProviderKind};

use crate::adapter::{
    describe_asset, first_frame_image, image_mime, run_with_deadline, GenerationContext,
    ProviderAdapter,
};
use crate::capabilities::{DurationSupport, ProviderCapabilities};
use crate::download::download_to_staging;
use crate::error::{parse_retry_after, ProviderError, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://api.minimax.chat/v1";

const MODEL: &str = "video-01";
const DIRECTOR_MODEL: &str = "video-01-director";

/// Camera instructions understood by the director model.
pub const CAMERA_MOVEMENTS: &[&str] = &[
    "Truck left",
    "Truck right",
    "Pan left",
    "Pan right",
    "Push in",
    "Pull out",
    "Pedestal up",
    "Pedestal down",
    "Tilt up",
    "Tilt down",
    "Zoom in",
    "Zoom out",
    "Shake",
    "Tracking shot",
    "Static shot",
];

const CAPABILITIES: ProviderCapabilities = ProviderCapabilities {
    modes: &[
        GenerationMode::TextToVideo,
        GenerationMode::ImageToVideo,
        GenerationMode::SubjectToVideo,
    ],
    durations: DurationSupport::Range { min: 6, max: 10 },
    aspect_ratios: &[AspectRatio::Landscape],
    supports_seed: false,
    supports_negative_prompt: false,
    camera_movements: CAMERA_MOVEMENTS,
    max_prompt_chars: 2000,
};

/// MiniMax connection settings.
#[derive(Debug, Clone)]
pub struct MinimaxConfig {
    pub api_key: String,
    pub base_url: String,
    pub poll_interval: Duration,
    pub resolution: String,
}

impl MinimaxConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(10),
            resolution: "1080p".to_string(),
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

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    status: Option<String>,
    video_url: Option<String>,
    error: Option<Value>,
}

/// Adapter for the MiniMax `video-01` family.
pub struct MinimaxAdapter {
    config: MinimaxConfig,
    client: reqwest::Client,
}

impl MinimaxAdapter {
    pub fn new(config: MinimaxConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: MinimaxConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn generations_url(&self) -> String {
        format!("{}/video/generations", self.config.base_url.trim_end_matches('/'))
    }

    async fn submit(&self, request: &GenerationRequest, image: Option<&Path>) -> ProviderResult<String> {
        let mode = request.mode();
        let (model, prompt) = director_prompt(request);
        let duration = request.params.duration_secs;

        let builder = self
            .client
            .post(self.generations_url())
            .bearer_auth(&self.config.api_key);

        let builder = match (mode, image) {
            (GenerationMode::TextToVideo, _) | (_, None) => builder.json(&json!({
                "model": model,
                "prompt": prompt,
                "duration": duration,
                "resolution": self.config.resolution,
            })),
            (mode, Some(image)) => {
                let field = if mode == GenerationMode::SubjectToVideo {
                    "subject_image"
                } else {
                    "image"
                };
                let mut form = Form::new()
                    .text("model", model)
                    .text("duration", duration.to_string())
                    .text("resolution", self.config.resolution.clone());
                if !prompt.is_empty() {
                    form = form.text("prompt", prompt);
                }
                form = form.part(field, image_part(image).await?);
                builder.multipart(form)
            }
        };

        info!(
            clip_id = %request.clip_id,
            mode = %mode,
            model,
            "Submitting MiniMax generation"
        );
        let response = check_response(builder.send().await?).await?;
        let body: SubmitResponse = response.json().await?;
        body.task_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::permanent("MiniMax returned no task_id"))
    }

    async fn wait_for_video(&self, task_id: &str) -> ProviderResult<String> {
        let url = format!("{}/{}", self.generations_url(), task_id);
        loop {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.config.api_key)
                .send()
                .await?;
            let task: TaskStatusResponse = check_response(response).await?.json().await?;
            let status = task.status.unwrap_or_default();
            debug!(task_id, status = %status, "MiniMax task status");

            match status.as_str() {
                "completed" => {
                    return task.video_url.filter(|u| !u.is_empty()).ok_or_else(|| {
                        ProviderError::permanent("MiniMax task completed without a video_url")
                    });
                }
                "failed" => {
                    let reason = task
                        .error
                        .as_ref()
                        .map(describe_error)
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(ProviderError::permanent(format!("MiniMax task failed: {}", reason)));
                }
                "pending" | "processing" => tokio::time::sleep(self.config.poll_interval).await,
                other => {
                    return Err(ProviderError::permanent(format!(
                        "unknown MiniMax task status '{}'",
                        other
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for MinimaxAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Minimax
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &CAPABILITIES
    }

    fn validate(&self, request: &GenerationRequest) -> ProviderResult<()> {
        CAPABILITIES.validate(request)?;
        if request.mode() == GenerationMode::SubjectToVideo && !request.params.camera_movements.is_empty() {
            return Err(ProviderError::permanent(
                "camera movements are not available for subject references",
            ));
        }
        Ok(())
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        ctx: &GenerationContext,
    ) -> ProviderResult<GeneratedAsset> {
        self.validate(request)?;
        let paths = ctx.paths(&request.clip_id);

        run_with_deadline(ctx, &request.clip_id, async {
            let image = first_frame_image(request, &paths).await?;
            let task_id = self.submit(request, image.as_deref()).await?;
            info!(clip_id = %request.clip_id, task_id = %task_id, "MiniMax task started");

            let video_url = self.wait_for_video(&task_id).await?;
            download_to_staging(&self.client, &video_url, &paths).await?;
            Ok(describe_asset(&paths.video, Some(task_id)).await)
        })
        .await
    }
}

/// Model name and prompt, with camera movements folded in for the director model.
fn director_prompt(request: &GenerationRequest) -> (&'static str, String) {
    let prompt = request.prompt.trim().to_string();
    let movements = &request.params.camera_movements;
    if movements.is_empty() || request.mode() == GenerationMode::SubjectToVideo {
        return (MODEL, prompt);
    }

    let instructions = movements
        .iter()
        .map(|m| format!("[{}]", canonical_movement(m)))
        .collect::<Vec<_>>()
        .join(", ");
    let prompt = if prompt.is_empty() {
        instructions
    } else {
        format!("{}. {}", prompt, instructions)
    };
    (DIRECTOR_MODEL, prompt)
}

fn canonical_movement(movement: &str) -> &str {
    let trimmed = movement.trim();
    CAMERA_MOVEMENTS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(trimmed))
        .copied()
        .unwrap_or(trimmed)
}

async fn image_part(path: &Path) -> ProviderResult<Part> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(image_mime(path))?)
}

/// Turn an error status into a classified error, preferring `error.message`.
async fn check_response(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").map(describe_error))
        .unwrap_or(body);
    Err(ProviderError::from_http_status(status.as_u16(), &message, retry_after))
}

fn describe_error(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
