//! The provider adapter contract.

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use reel_models::{ClipId, GeneratedAsset, GenerationRequest, ProviderKind};

use crate::capabilities::ProviderCapabilities;
use crate::error::{ProviderError, ProviderResult};

/// Where and how long one generation call may run.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    /// Directory the generated file is written to
    pub staging_dir: PathBuf,
    /// Upper bound for the whole call, including polling and download
    pub deadline: Duration,
    /// Lifecycle number folded into staging names
    pub run: Option<u64>,
}

impl GenerationContext {
    pub fn new(staging_dir: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            deadline,
            run: None,
        }
    }

    /// Context for one lifecycle of a clip, whose files never collide with
    /// those of another lifecycle.
    pub fn for_run(&self, run: u64) -> Self {
        Self {
            run: Some(run),
            ..self.clone()
        }
    }

    /// Files a generation for `clip_id` may touch.
    pub fn paths(&self, clip_id: &ClipId) -> StagingPaths {
        let stem = match self.run {
            Some(run) => format!("{}-{}", clip_id, run),
            None => clip_id.to_string(),
        };
        StagingPaths {
            video: self.staging_dir.join(format!("{}.mp4", stem)),
            partial: self.staging_dir.join(format!("{}.mp4.part", stem)),
            frame: self.staging_dir.join(format!("{}.frame.jpg", stem)),
        }
    }
}

/// Staging files owned by one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingPaths {
    /// Final location of the generated clip
    pub video: PathBuf,
    /// In-progress download
    pub partial: PathBuf,
    /// First frame extracted from a source video
    pub frame: PathBuf,
}

impl StagingPaths {
    async fn remove_scratch(&self) {
        let _ = tokio::fs::remove_file(&self.partial).await;
        let _ = tokio::fs::remove_file(&self.frame).await;
    }

}

/// Translates a [`GenerationRequest`] into one provider's protocol.
///
/// On success exactly one file exists at [`StagingPaths::video`]; on
/// failure nothing the call wrote is left in the staging directory.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> &ProviderCapabilities;

    /// Reject requests this provider cannot serve.
    fn validate(&self, request: &GenerationRequest) -> ProviderResult<()> {
        self.capabilities().validate(request)
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        ctx: &GenerationContext,
    ) -> ProviderResult<GeneratedAsset>;
}

/// Run `work` under the context deadline and enforce the staging contract.
pub async fn run_with_deadline<F>(
    ctx: &GenerationContext,
    clip_id: &ClipId,
    work: F,
) -> ProviderResult<GeneratedAsset>
where
    F: Future<Output = ProviderResult<GeneratedAsset>>,
{
    let paths = ctx.paths(clip_id);
    tokio::fs::create_dir_all(&ctx.staging_dir).await?;
    let video_existed = tokio::fs::try_exists(&paths.video).await.unwrap_or(false);

    let result = match tokio::time::timeout(ctx.deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::transient(format!(
            "deadline of {:?} exceeded",
            ctx.deadline
        ))),
    };

    match result {
        Ok(asset) => {
            paths.remove_scratch().await;
            Ok(asset)
        }
        Err(e) => {
            paths.remove_scratch().await;
            if !video_existed {
                let _ = tokio::fs::remove_file(&paths.video).await;
            }
            Err(e)
        }
    }
}

/// Image to send as the first frame, extracting one from a source video if needed.
pub async fn first_frame_image(
    request: &GenerationRequest,
    paths: &StagingPaths,
) -> ProviderResult<Option<PathBuf>> {
    if let Some(image) = &request.reference_image {
        return Ok(Some(image.path.clone()));
    }
    match &request.source_frame {
        Some(source) => {
            debug!(
                clip_id = %request.clip_id,
                video = %source.video_path.display(),
                timestamp = source.timestamp_secs,
                "Extracting continuity frame"
            );
            reel_media::extract_frame(&source.video_path, source.timestamp_secs, &paths.frame).await?;
            Ok(Some(paths.frame.clone()))
        }
        None => Ok(None),
    }
}

/// Describe the downloaded file, inspecting it when ffprobe can read it.
pub async fn describe_asset(path: &Path, provider_task_id: Option<String>) -> GeneratedAsset {
    let mut asset = GeneratedAsset::new(path);
    asset.provider_task_id = provider_task_id;
    match reel_media::inspect_video(path).await {
        Ok(info) => {
            asset.duration_secs = Some(info.duration);
            asset.width = Some(info.width);
            asset.height = Some(info.height);
        }
        Err(e) => warn!(path = %path.display(), "Could not inspect generated clip: {}", e),
    }
    asset
}

/// MIME type for an image upload, by extension.
pub(crate) fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
