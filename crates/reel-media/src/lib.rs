//! FFmpeg CLI wrapper for clip normalization and concatenation.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - FFprobe stream inspection
//! - The clip normalizer and the stream-copy concatenator
//! - Still frame extraction for continuity requests

pub mod command;
pub mod concat;
pub mod error;
pub mod frame;
pub mod fs_utils;
pub mod normalize;
pub mod inspect;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use concat::{ClipConcatenator, ConcatOutput, FfmpegConcatenator};
pub use error::{ConcatError, MediaError, MediaResult, NormalizationError};
pub use frame::extract_frame;
pub use normalize::{ClipNormalizer, FfmpegNormalizer, NormalizedClip};
pub use inspect::{get_duration, inspect_video, AudioInfo, StreamSignature, VideoInfo};
pub use progress::{EncodeProgress, ProgressParser};
