//! Parser for ffmpeg's `-progress` key/value stream.
//!
//! ffmpeg writes one `key=value` per line and closes each block with a
//! `progress=continue` or `progress=end` line. Diagnostics share the same
//! pipe, so every line is classified before it is parsed.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Keys ffmpeg emits inside a progress block.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "stream_0_0_q",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Encoder state at the end of one progress block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodeProgress {
    pub frame: u64,
    /// Encoded media time in milliseconds
    pub out_time_ms: i64,
    /// Frames duplicated by frame-rate conversion
    pub dup_frames: u64,
    /// Frames dropped by frame-rate conversion
    pub drop_frames: u64,
    /// Multiple of realtime, 0 while ffmpeg reports N/A
    pub speed: f64,
    pub finished: bool,
}

impl EncodeProgress {
    /// Share of `total_ms` encoded so far, as a percentage in 0..=100.
    pub fn percent_of(&self, total_ms: i64) -> f64 {
        if self.finished {
            return 100.0;
        }
        if total_ms <= 0 {
            return 0.0;
        }
        (self.out_time_ms as f64 * 100.0 / total_ms as f64).clamp(0.0, 100.0)
    }
}

/// Classification of one stderr line.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// Part of a progress block; carries the snapshot when the block closes
    Field(Option<EncodeProgress>),
    /// Anything else ffmpeg printed
    Diagnostic,
}

/// Accumulates progress blocks from a line stream.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: EncodeProgress,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> ProgressLine {
        let Some((key, value)) = line.trim().split_once('=') else {
            return ProgressLine::Diagnostic;
        };
        if !PROGRESS_KEYS.contains(&key) {
            return ProgressLine::Diagnostic;
        }

        let current = &mut self.current;
        match key {
            // Both carry microseconds in current ffmpeg builds
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "frame" => set_parsed(&mut current.frame, value),
            "dup_frames" => set_parsed(&mut current.dup_frames, value),
            "drop_frames" => set_parsed(&mut current.drop_frames, value),
            "speed" => {
                if let Some(speed) = value.trim().strip_suffix('x') {
                    set_parsed(&mut current.speed, speed.trim());
                }
            }
            "progress" => {
                current.finished = value == "end";
                return ProgressLine::Field(Some(current.clone()));
            }
            _ => {}
        }
        ProgressLine::Field(None)
    }
}

fn set_parsed<T: FromStr>(slot: &mut T, value: &str) {
    if let Ok(parsed) = value.parse() {
        *slot = parsed;
    }
}
