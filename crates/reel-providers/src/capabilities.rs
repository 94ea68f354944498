//! Provider feature sets and request validation.

use reel_models::{AspectRatio, GenerationMode, GenerationRequest};

use crate::error::{ProviderError, ProviderResult};

/// Clip durations a provider accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationSupport {
    Range { min: u32, max: u32 },
    OneOf(&'static [u32]),
}

impl DurationSupport {
    pub fn accepts(&self, secs: u32) -> bool {
        match self {
            DurationSupport::Range { min, max } => (*min..=*max).contains(&secs),
            DurationSupport::OneOf(values) => values.contains(&secs),
        }
    }

    fn describe(&self) -> String {
        match self {
            DurationSupport::Range { min, max } => format!("{}-{}s", min, max),
            DurationSupport::OneOf(values) => values
                .iter()
                .map(|v| format!("{}s", v))
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }
}

/// What a provider can do. Requests outside this set fail as `Permanent`
/// before any network call.
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    pub modes: &'static [GenerationMode],
    pub durations: DurationSupport,
    pub aspect_ratios: &'static [AspectRatio],
    pub supports_seed: bool,
    pub supports_negative_prompt: bool,
    /// Accepted camera instructions; empty means none are supported
    pub camera_movements: &'static [&'static str],
    pub max_prompt_chars: usize,
}

impl ProviderCapabilities {
    /// Check `request` against this feature set.
    pub fn validate(&self, request: &GenerationRequest) -> ProviderResult<()> {
        let mode = request.mode();
        if !self.modes.contains(&mode) {
            return Err(ProviderError::permanent(format!(
                "{} is not supported by {}",
                mode, request.provider
            )));
        }

        let prompt = request.prompt.trim();
        if prompt.is_empty() && mode != GenerationMode::ImageToVideo {
            return Err(ProviderError::permanent("prompt is empty"));
        }
        if prompt.chars().count() > self.max_prompt_chars {
            return Err(ProviderError::permanent(format!(
                "prompt exceeds {} characters",
                self.max_prompt_chars
            )));
        }

        let params = &request.params;
        if !self.durations.accepts(params.duration_secs) {
            return Err(ProviderError::permanent(format!(
                "duration {}s not supported (allowed: {})",
                params.duration_secs,
                self.durations.describe()
            )));
        }

        if !self.aspect_ratios.contains(&params.aspect_ratio) {
            return Err(ProviderError::permanent(format!(
                "aspect ratio {} not supported",
                params.aspect_ratio
            )));
        }

        if params.seed.is_some() && !self.supports_seed {
            return Err(ProviderError::permanent("seed is not supported"));
        }

        if params.negative_prompt.is_some() && !self.supports_negative_prompt {
            return Err(ProviderError::permanent("negative prompt is not supported"));
        }

        for movement in &params.camera_movements {
            if !self
                .camera_movements
                .iter()
                .any(|known| known.eq_ignore_ascii_case(movement.trim()))
            {
                return Err(ProviderError::permanent(format!(
                    "camera movement '{}' is not supported",
                    movement
                )));
            }
        }

        if let Some(image) = &request.reference_image {
            if !image.path.is_file() {
                return Err(ProviderError::permanent(format!(
                    "reference image not found: {}",
                    image.path.display()
                )));
            }
        }

        if let Some(source) = &request.source_frame {
            if !source.video_path.is_file() {
                return Err(ProviderError::permanent(format!(
                    "source video not found: {}",
                    source.video_path.display()
                )));
            }
            if !source.timestamp_secs.is_finite() || source.timestamp_secs < 0.0 {
                return Err(ProviderError::permanent(format!(
                    "invalid source timestamp {}",
                    source.timestamp_secs
                )));
            }
        }

        Ok(())
    }
}
