//! Generation requests and their results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{AspectRatio, ClipId, GenerationMode, ProviderKind};

/// Default clip duration requested from providers, in seconds.
pub const DEFAULT_CLIP_DURATION_SECS: u32 = 6;

/// Provider-independent generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationParams {
    #[serde(default = "default_duration")]
    pub duration_secs: u32,

    #[serde(default)]
    pub aspect_ratio: AspectRatio,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,

    /// Director-style camera instructions ("Pan left", "Zoom in", ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub camera_movements: Vec<String>,

    /// Prompt adherence for providers that expose it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f32>,
}

fn default_duration() -> u32 {
    DEFAULT_CLIP_DURATION_SECS
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_CLIP_DURATION_SECS,
            aspect_ratio: AspectRatio::default(),
            seed: None,
            negative_prompt: None,
            camera_movements: Vec::new(),
            cfg_scale: None,
        }
    }
}

/// How a reference image is used by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceRole {
    /// The image becomes the first frame.
    #[default]
    FirstFrame,
    /// The image is a character/subject reference.
    Subject,
}

/// Reference image or character asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceImage {
    pub path: PathBuf,
    #[serde(default)]
    pub role: ReferenceRole,
}

/// A frame of an existing video to continue from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceFrame {
    pub video_path: PathBuf,
    pub timestamp_secs: f64,
}

/// Immutable request for one clip. Consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationRequest {
    pub clip_id: ClipId,
    pub prompt: String,
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<ReferenceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_frame: Option<SourceFrame>,
    #[serde(default)]
    pub params: GenerationParams,
}

impl GenerationRequest {
    /// Create a text-to-video request with default parameters.
    pub fn new(clip_id: impl Into<ClipId>, provider: ProviderKind, prompt: impl Into<String>) -> Self {
        Self {
            clip_id: clip_id.into(),
            prompt: prompt.into(),
            provider,
            reference_image: None,
            source_frame: None,
            params: GenerationParams::default(),
        }
    }

    pub fn with_reference_image(mut self, path: impl Into<PathBuf>, role: ReferenceRole) -> Self {
        self.reference_image = Some(ReferenceImage {
            path: path.into(),
            role,
        });
        self
    }

    pub fn with_source_frame(mut self, video_path: impl Into<PathBuf>, timestamp_secs: f64) -> Self {
        self.source_frame = Some(SourceFrame {
            video_path: video_path.into(),
            timestamp_secs,
        });
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Generation mode implied by the supplied assets.
    pub fn mode(&self) -> GenerationMode {
        match (&self.reference_image, &self.source_frame) {
            (Some(image), _) if image.role == ReferenceRole::Subject => GenerationMode::SubjectToVideo,
            (Some(_), _) | (None, Some(_)) => GenerationMode::ImageToVideo,
            (None, None) => GenerationMode::TextToVideo,
        }
    }
}

/// A generated clip downloaded to local storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedAsset {
    pub path: PathBuf,
    /// Duration reported by the provider or measured locally.
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Provider-side task identifier, when the provider has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_task_id: Option<String>,
}

impl GeneratedAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration_secs: None,
            width: None,
            height: None,
            provider_task_id: None,
        }
    }

    /// Resolution as "WxH" when both dimensions are known.
    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}
