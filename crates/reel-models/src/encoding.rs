//! Normalization profile and export settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::provider::ParseEnumError;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default pixel format; yuv420p plays everywhere
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "medium";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 23;
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_AUDIO_CHANNELS: u8 = 2;

/// Default export resolution
pub const DEFAULT_EXPORT_WIDTH: u32 = 1920;
pub const DEFAULT_EXPORT_HEIGHT: u32 = 1080;
pub const DEFAULT_EXPORT_FPS: u32 = 30;

/// How the encoder spends bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BitratePolicy {
    /// Constant quality
    Crf { crf: u8 },
    /// Target bitrate in kbit/s
    Constant { kbps: u32 },
}

impl Default for BitratePolicy {
    fn default() -> Self {
        BitratePolicy::Crf { crf: DEFAULT_CRF }
    }
}

/// Audio handling during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AudioPolicy {
    /// Drop audio entirely.
    Strip,
    /// Re-encode to a fixed layout; silent inputs get a generated silent track.
    Encode {
        codec: String,
        sample_rate: u32,
        channels: u8,
        bitrate: String,
    },
}

impl Default for AudioPolicy {
    fn default() -> Self {
        AudioPolicy::Encode {
            codec: DEFAULT_AUDIO_CODEC.to_string(),
            sample_rate: DEFAULT_AUDIO_SAMPLE_RATE,
            channels: DEFAULT_AUDIO_CHANNELS,
            bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

/// Canonical stream parameters every clip is brought to before concatenation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizationProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub bitrate: BitratePolicy,
    #[serde(default)]
    pub audio: AudioPolicy,
    /// Re-encode even when the input already matches.
    #[serde(default)]
    pub force_reencode: bool,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_pixel_format() -> String {
    DEFAULT_PIXEL_FORMAT.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}

impl Default for NormalizationProfile {
    fn default() -> Self {
        Self {
            width: DEFAULT_EXPORT_WIDTH,
            height: DEFAULT_EXPORT_HEIGHT,
            fps: DEFAULT_EXPORT_FPS,
            video_codec: default_video_codec(),
            pixel_format: default_pixel_format(),
            preset: default_preset(),
            bitrate: BitratePolicy::default(),
            audio: AudioPolicy::default(),
            force_reencode: false,
        }
    }
}

impl NormalizationProfile {
    /// Codec name as ffprobe reports it for streams produced by `video_codec`.
    pub fn stream_codec_name(&self) -> &str {
        match self.video_codec.as_str() {
            "libx264" | "h264_nvenc" | "h264_videotoolbox" => "h264",
            "libx265" | "hevc_nvenc" => "hevc",
            "libvpx-vp9" => "vp9",
            "libaom-av1" | "libsvtav1" => "av1",
            other => other,
        }
    }

    pub fn wants_audio(&self) -> bool {
        !matches!(self.audio, AudioPolicy::Strip)
    }
}

/// Export quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl ExportQuality {
    pub fn crf(&self) -> u8 {
        match self {
            ExportQuality::Low => 28,
            ExportQuality::Medium => DEFAULT_CRF,
            ExportQuality::High => 18,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportQuality::Low => "low",
            ExportQuality::Medium => "medium",
            ExportQuality::High => "high",
        }
    }
}

impl FromStr for ExportQuality {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(ExportQuality::Low),
            "medium" => Ok(ExportQuality::Medium),
            "high" => Ok(ExportQuality::High),
            other => Err(ParseEnumError::Unknown {
                kind: "quality",
                value: other.to_string(),
            }),
        }
    }
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Mov,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Caller-facing export options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExportSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub quality: ExportQuality,
    #[serde(default = "default_true")]
    pub include_audio: bool,
    #[serde(default)]
    pub force_reencode: bool,
    #[serde(default)]
    pub format: ContainerFormat,
}

fn default_width() -> u32 {
    DEFAULT_EXPORT_WIDTH
}
fn default_height() -> u32 {
    DEFAULT_EXPORT_HEIGHT
}
fn default_fps() -> u32 {
    DEFAULT_EXPORT_FPS
}
fn default_true() -> bool {
    true
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_EXPORT_WIDTH,
            height: DEFAULT_EXPORT_HEIGHT,
            fps: DEFAULT_EXPORT_FPS,
            quality: ExportQuality::default(),
            include_audio: true,
            force_reencode: false,
            format: ContainerFormat::default(),
        }
    }
}

impl ExportSettings {
    /// Normalization profile for these settings.
    pub fn profile(&self) -> NormalizationProfile {
        NormalizationProfile {
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate: BitratePolicy::Crf {
                crf: self.quality.crf(),
            },
            audio: if self.include_audio {
                AudioPolicy::default()
            } else {
                AudioPolicy::Strip
            },
            force_reencode: self.force_reencode,
            ..NormalizationProfile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_to_profile() {
        let settings = ExportSettings {
            quality: ExportQuality::High,
            include_audio: false,
            width: 1280,
            height: 720,
            ..Default::default()
        };
        let profile = settings.profile();
        assert_eq!(profile.width, 1280);
        assert_eq!(profile.height, 720);
        assert_eq!(profile.bitrate, BitratePolicy::Crf { crf: 18 });
        assert!(!profile.wants_audio());
        assert_eq!(profile.stream_codec_name(), "h264");
    }

    #[test]
    fn test_settings_defaults_from_empty_json() {
        let settings: ExportSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ExportSettings::default());
        assert!(settings.include_audio);
    }
}
