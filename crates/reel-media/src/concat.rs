//! Ordered stream-copy concatenation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::ConcatError;
use crate::inspect::{inspect_video, StreamSignature};

/// Result of a concatenation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatOutput {
    pub path: PathBuf,
    pub duration_secs: f64,
    /// Sum of the input durations
    pub expected_duration_secs: f64,
}

/// Joins an ordered list of compatible clips into one file.
#[async_trait]
pub trait ClipConcatenator: Send + Sync {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<ConcatOutput, ConcatError>;
}

/// FFmpeg concat-demuxer implementation.
#[derive(Debug, Clone, Default)]
pub struct FfmpegConcatenator {
    runner: FfmpegRunner,
}

impl FfmpegConcatenator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.runner = self.runner.with_timeout(secs);
        self
    }
}

#[async_trait]
impl ClipConcatenator for FfmpegConcatenator {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<ConcatOutput, ConcatError> {
        if inputs.is_empty() {
            return Err(ConcatError::EmptySequence);
        }

        // Every input must carry the first input's stream layout
        let mut expected: Option<StreamSignature> = None;
        let mut expected_duration_secs = 0.0;
        let mut frame_interval = 0.0;
        for (index, input) in inputs.iter().enumerate() {
            let info = inspect_video(input).await.map_err(|e| {
                ConcatError::write_failure(format!("cannot read {}: {}", input.display(), e))
            })?;
            let signature = info.signature();
            match &expected {
                None => {
                    if info.fps > 0.0 {
                        frame_interval = 1.0 / info.fps;
                    }
                    expected = Some(signature);
                }
                Some(first) if *first != signature => {
                    return Err(ConcatError::StreamMismatch {
                        index,
                        path: input.clone(),
                        expected: first.to_string(),
                        found: signature.to_string(),
                    });
                }
                Some(_) => {}
            }
            expected_duration_secs += info.duration;
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let list_path = concat_list_path(output);
        let mut list = String::new();
        for input in inputs {
            let absolute = tokio::fs::canonicalize(input).await?;
            list.push_str(&concat_list_entry(&absolute));
        }
        tokio::fs::write(&list_path, list).await?;

        info!(
            clips = inputs.len(),
            output = %output.display(),
            "Concatenating clips with stream copy"
        );

        let cmd = FfmpegCommand::new(&list_path, output)
            .concat_demuxer()
            .map("0")
            .stream_copy()
            .faststart();
        let result = self.runner.run(&cmd).await;

        let _ = tokio::fs::remove_file(&list_path).await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(output).await;
            let detail = match &e {
                crate::MediaError::FfmpegFailed {
                    stderr: Some(stderr),
                    ..
                } => format!("{}: {}", e, stderr),
                _ => e.to_string(),
            };
            return Err(ConcatError::WriteFailure(detail));
        }

        let duration_secs = match inspect_video(output).await {
            Ok(info) => info.duration,
            Err(e) => {
                let _ = tokio::fs::remove_file(output).await;
                return Err(ConcatError::write_failure(format!(
                    "concatenated output unreadable: {}",
                    e
                )));
            }
        };

        if frame_interval > 0.0 && (duration_secs - expected_duration_secs).abs() > frame_interval {
            warn!(
                expected = expected_duration_secs,
                actual = duration_secs,
                "Concatenated duration differs from the sum of clip durations by more than one frame"
            );
        }

        Ok(ConcatOutput {
            path: output.to_path_buf(),
            duration_secs,
            expected_duration_secs,
        })
    }
}

fn concat_list_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".concat.txt");
    output.with_file_name(name)
}

/// One `file '...'` line, quoted for the concat demuxer.
fn concat_list_entry(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', r"'\''");
    format!("file '{}'\n", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_sequence() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = FfmpegConcatenator::new()
            .concatenate(&[], &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConcatError::EmptySequence));
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[tokio::test]
    async fn test_unreadable_input_is_write_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = FfmpegConcatenator::new()
            .concatenate(&[dir.path().join("gone.mp4")], &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConcatError::WriteFailure(_)));
    }

    #[test]
    fn test_list_entry_quoting() {
        assert_eq!(
            concat_list_entry(Path::new("/tmp/a.mp4")),
            "file '/tmp/a.mp4'\n"
        );
        assert_eq!(
            concat_list_entry(Path::new("/tmp/it's.mp4")),
            "file '/tmp/it'\\''s.mp4'\n"
        );
    }

    #[test]
    fn test_list_path_sits_next_to_output() {
        assert_eq!(
            concat_list_path(Path::new("/stage/job/joined.mp4")),
            PathBuf::from("/stage/job/joined.mp4.concat.txt")
        );
    }
}
