//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Audio stream parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Video file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Video codec
    pub codec: String,
    /// Pixel format (e.g. yuv420p)
    pub pixel_format: String,
    /// Video stream time base (e.g. 1/90000)
    pub time_base: String,
    /// First audio stream, if any
    pub audio: Option<AudioInfo>,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
}

impl VideoInfo {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Stream parameters that must agree for a stream-copy concat.
    pub fn signature(&self) -> StreamSignature {
        StreamSignature {
            codec: self.codec.clone(),
            width: self.width,
            height: self.height,
            fps_millis: (self.fps * 1000.0).round() as u64,
            pixel_format: self.pixel_format.clone(),
            time_base: self.time_base.clone(),
            audio: self.audio.clone(),
        }
    }
}

/// Comparable stream parameters of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSignature {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Frame rate in thousandths of a frame per second
    pub fps_millis: u64,
    pub pixel_format: String,
    pub time_base: String,
    pub audio: Option<AudioInfo>,
}

impl fmt::Display for StreamSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} @{:.3}fps {} tb={}",
            self.codec,
            self.width,
            self.height,
            self.fps_millis as f64 / 1000.0,
            self.pixel_format,
            self.time_base
        )?;
        match &self.audio {
            Some(audio) => write!(f, " audio={} {}Hz {}ch", audio.codec, audio.sample_rate, audio.channels),
            None => write!(f, " no-audio"),
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    pix_fmt: Option<String>,
    time_base: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u8>,
    duration: Option<String>,
}

/// Inspect a video file for information.
pub async fn inspect_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed for {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let report: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    parse_ffprobe_output(report)
}

fn parse_ffprobe_output(report: FfprobeOutput) -> MediaResult<VideoInfo> {
    let video_stream = report
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let audio = report
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .map(|s| AudioInfo {
            codec: s.codec_name.clone().unwrap_or_default(),
            sample_rate: s
                .sample_rate
                .as_ref()
                .and_then(|r| r.parse().ok())
                .unwrap_or(0),
            channels: s.channels.unwrap_or(0),
        });

    // Container duration, falling back to the video stream's own
    let duration = report
        .format
        .duration
        .as_ref()
        .or(video_stream.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let size = report
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let bitrate = report
        .format
        .bit_rate
        .as_ref()
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = video_stream
        .avg_frame_rate
        .as_ref()
        .and_then(|r| parse_frame_rate(r))
        .or_else(|| video_stream.r_frame_rate.as_ref().and_then(|r| parse_frame_rate(r)))
        .unwrap_or(0.0);

    Ok(VideoInfo {
        duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        pixel_format: video_stream.pix_fmt.clone().unwrap_or_default(),
        time_base: video_stream.time_base.clone().unwrap_or_default(),
        audio,
        size,
        bitrate,
    })
}

/// Get video duration in seconds.
pub async fn get_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let info = inspect_video(path).await?;
    Ok(info.duration)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}
