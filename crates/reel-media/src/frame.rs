//! Still frame extraction.

use std::path::Path;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::inspect::inspect_video;

/// Extract the frame at `timestamp_secs` of `video_path` into `output_path`.
///
/// Used to continue a new clip from a point in an existing one.
pub async fn extract_frame(
    video_path: impl AsRef<Path>,
    timestamp_secs: f64,
    output_path: impl AsRef<Path>,
) -> MediaResult<()> {
    let video_path = video_path.as_ref();
    let output_path = output_path.as_ref();

    if !timestamp_secs.is_finite() || timestamp_secs < 0.0 {
        return Err(MediaError::InvalidTimestamp(format!("{}", timestamp_secs)));
    }

    let info = inspect_video(video_path).await?;
    if info.duration > 0.0 && timestamp_secs > info.duration {
        return Err(MediaError::InvalidTimestamp(format!(
            "{:.3}s is past the end of {} ({:.3}s)",
            timestamp_secs,
            video_path.display(),
            info.duration
        )));
    }

    let cmd = FfmpegCommand::new(video_path, output_path)
        .seek(timestamp_secs)
        .single_frame()
        .output_args(["-q:v", "2"]);

    FfmpegRunner::new().run(&cmd).await?;

    if !output_path.exists() {
        return Err(MediaError::ffmpeg_failed(
            format!("no frame written at {:.3}s", timestamp_secs),
            None,
            None,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_negative_timestamp_rejected() {
        let err = extract_frame("clip.mp4", -1.0, "frame.png").await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidTimestamp(_)));
    }

    #[tokio::test]
    async fn test_nan_timestamp_rejected() {
        let err = extract_frame("clip.mp4", f64::NAN, "frame.png").await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidTimestamp(_)));
    }
}
