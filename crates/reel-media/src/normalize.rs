//! Clip normalization to a canonical stream profile.
//!
//! Every clip leaving the normalizer carries identical codec, resolution,
//! frame rate, pixel format, time base and audio layout, so the concatenator
//! can join them with a stream copy. Scaling letterboxes rather than crops,
//! and frame-rate conversion duplicates or drops frames.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use reel_models::{AudioPolicy, BitratePolicy, NormalizationProfile};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, NormalizationError};
use crate::inspect::{inspect_video, VideoInfo};

/// MP4 track timescale written for every normalized clip.
pub const TRACK_TIMESCALE: u32 = 90_000;

/// Encoder attempts per clip: the first run plus one retry.
const ENCODE_ATTEMPTS: u32 = 2;

/// Result of normalizing one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedClip {
    pub path: PathBuf,
    pub duration_secs: f64,
    /// Input already matched the profile and was copied unchanged
    pub passthrough: bool,
}

/// Brings one input video to a [`NormalizationProfile`].
#[async_trait]
pub trait ClipNormalizer: Send + Sync {
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        profile: &NormalizationProfile,
    ) -> Result<NormalizedClip, NormalizationError>;
}

/// FFmpeg-backed normalizer.
#[derive(Debug, Clone, Default)]
pub struct FfmpegNormalizer {
    runner: FfmpegRunner,
}

impl FfmpegNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill any single encode that runs longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.runner = self.runner.with_timeout(secs);
        self
    }

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        info: &VideoInfo,
        profile: &NormalizationProfile,
    ) -> Result<(), NormalizationError> {
        let cmd = build_normalize_command(input, output, info, profile);
        let total_ms = (info.duration * 1000.0) as i64;

        let mut last_error = None;
        for attempt in 1..=ENCODE_ATTEMPTS {
            let label = input.display().to_string();
            let result = self
                .runner
                .run_with_progress(&cmd, move |progress| {
                    debug!(
                        input = %label,
                        percent = progress.percent_of(total_ms),
                        dup_frames = progress.dup_frames,
                        drop_frames = progress.drop_frames,
                        "Normalize progress"
                    );
                })
                .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < ENCODE_ATTEMPTS && is_retryable_encode_error(&e) => {
                    warn!(
                        input = %input.display(),
                        attempt,
                        "Encode failed, retrying once: {}",
                        e
                    );
                    let _ = tokio::fs::remove_file(output).await;
                    last_error = Some(e);
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(output).await;
                    last_error = Some(e);
                    break;
                }
            }
        }

        Err(NormalizationError::encode_failure(
            input,
            last_error.unwrap_or_else(|| MediaError::internal("encoder did not run")),
        ))
    }
}

#[async_trait]
impl ClipNormalizer for FfmpegNormalizer {
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        profile: &NormalizationProfile,
    ) -> Result<NormalizedClip, NormalizationError> {
        let info = match inspect_video(input).await {
            Ok(info) => info,
            Err(e) if e.is_unreadable_input() => {
                return Err(NormalizationError::unsupported(input, e.to_string()))
            }
            Err(e) => return Err(NormalizationError::encode_failure(input, e)),
        };

        if info.width == 0 || info.height == 0 {
            return Err(NormalizationError::unsupported(input, "video stream has no dimensions"));
        }
        if info.duration <= 0.0 {
            return Err(NormalizationError::unsupported(input, "video has zero duration"));
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| NormalizationError::encode_failure(input, e.into()))?;
        }

        if !profile.force_reencode && matches_profile(&info, profile) {
            info!(input = %input.display(), "Input already matches profile, passing through");
            tokio::fs::copy(input, output)
                .await
                .map_err(|e| NormalizationError::encode_failure(input, e.into()))?;
            return Ok(NormalizedClip {
                path: output.to_path_buf(),
                duration_secs: info.duration,
                passthrough: true,
            });
        }

        info!(
            input = %input.display(),
            from = %format!("{}x{}@{:.3}", info.width, info.height, info.fps),
            to = %format!("{}x{}@{}", profile.width, profile.height, profile.fps),
            "Normalizing clip"
        );
        self.encode(input, output, &info, profile).await?;

        let duration_secs = match inspect_video(output).await {
            Ok(out) => out.duration,
            Err(e) => {
                let _ = tokio::fs::remove_file(output).await;
                return Err(NormalizationError::encode_failure(input, e));
            }
        };

        Ok(NormalizedClip {
            path: output.to_path_buf(),
            duration_secs,
            passthrough: false,
        })
    }
}

fn is_retryable_encode_error(e: &MediaError) -> bool {
    matches!(
        e,
        MediaError::FfmpegFailed { .. } | MediaError::Timeout(_) | MediaError::Io(_)
    )
}

/// Whether `info` already has exactly the stream layout `profile` produces.
pub fn matches_profile(info: &VideoInfo, profile: &NormalizationProfile) -> bool {
    let video_matches = info.codec == profile.stream_codec_name()
        && info.width == profile.width
        && info.height == profile.height
        && (info.fps - profile.fps as f64).abs() < 0.01
        && info.pixel_format == profile.pixel_format
        && info.time_base == format!("1/{}", TRACK_TIMESCALE);

    let audio_matches = match (&profile.audio, &info.audio) {
        (AudioPolicy::Strip, None) => true,
        (
            AudioPolicy::Encode {
                codec,
                sample_rate,
                channels,
                ..
            },
            Some(audio),
        ) => audio_codec_name(codec) == audio.codec && *sample_rate == audio.sample_rate && *channels == audio.channels,
        _ => false,
    };

    video_matches && audio_matches
}

fn audio_codec_name(encoder: &str) -> &str {
    match encoder {
        "libfdk_aac" => "aac",
        "libopus" => "opus",
        "libmp3lame" => "mp3",
        other => other,
    }
}

/// Scale-to-fit, letterbox, square pixels, constant frame rate.
pub fn build_video_filter(profile: &NormalizationProfile) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,\
         setsar=1,fps={fps},format={pix}",
        w = profile.width,
        h = profile.height,
        fps = profile.fps,
        pix = profile.pixel_format
    )
}

fn channel_layout(channels: u8) -> String {
    match channels {
        1 => "mono".to_string(),
        2 => "stereo".to_string(),
        n => format!("{}c", n),
    }
}

/// Build the ffmpeg invocation that brings `input` to `profile`.
pub fn build_normalize_command(
    input: &Path,
    output: &Path,
    info: &VideoInfo,
    profile: &NormalizationProfile,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(input, output);

    cmd = match &profile.audio {
        AudioPolicy::Strip => cmd.map("0:v:0").no_audio(),
        AudioPolicy::Encode {
            sample_rate, channels, ..
        } if !info.has_audio() => cmd
            .add_lavfi_input(format!(
                "anullsrc=channel_layout={}:sample_rate={}",
                channel_layout(*channels),
                sample_rate
            ))
            .map("0:v:0")
            .map("1:a:0")
            .shortest(),
        AudioPolicy::Encode { .. } => cmd.map("0:v:0").map("0:a:0"),
    };

    cmd = cmd
        .video_filter(build_video_filter(profile))
        .video_codec(&profile.video_codec)
        .preset(&profile.preset)
        .pixel_format(&profile.pixel_format);

    cmd = match profile.bitrate {
        BitratePolicy::Crf { crf } => cmd.crf(crf),
        BitratePolicy::Constant { kbps } => cmd.video_bitrate_kbps(kbps),
    };

    if let AudioPolicy::Encode {
        codec,
        sample_rate,
        channels,
        bitrate,
    } = &profile.audio
    {
        cmd = cmd
            .audio_codec(codec)
            .audio_layout(*sample_rate, *channels)
            .audio_bitrate(bitrate);
    }

    cmd.output_arg("-video_track_timescale")
        .output_arg(TRACK_TIMESCALE.to_string())
        .faststart()
}
