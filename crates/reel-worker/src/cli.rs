//! Command-line arguments for the `reel` binary.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use reel_models::generation::DEFAULT_CLIP_DURATION_SECS;
use reel_models::{
    AspectRatio, ClipId, ClipRecord, ExportQuality, ExportSettings, GenerationParams,
    GenerationRequest, ProjectId, ProviderKind, ReferenceRole,
};

/// AI clip generation and export pipeline
#[derive(Parser, Debug)]
#[command(name = "reel")]
#[command(version, about = "Generate AI video clips and export them as one video", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate one clip and wait for it to finish
    Generate(GenerateArgs),
    /// Normalize and join existing clip files into one export
    Export(ExportArgs),
    /// Print stream information for a video file
    Inspect {
        /// Video file to inspect
        file: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
pub struct GenerateArgs {
    /// Clip identifier; also names the downloaded file
    #[arg(long)]
    pub clip_id: String,

    /// Provider to generate with (minimax, segmind)
    #[arg(long)]
    pub provider: ProviderKind,

    #[arg(long)]
    pub prompt: String,

    /// First-frame image
    #[arg(long, conflicts_with = "subject")]
    pub image: Option<PathBuf>,

    /// Character reference image
    #[arg(long)]
    pub subject: Option<PathBuf>,

    /// Continue from a frame of this video
    #[arg(long, requires = "timestamp")]
    pub source_video: Option<PathBuf>,

    /// Frame timestamp in seconds, with --source-video
    #[arg(long, requires = "source_video")]
    pub timestamp: Option<f64>,

    /// Clip duration in seconds
    #[arg(long, default_value_t = DEFAULT_CLIP_DURATION_SECS)]
    pub duration: u32,

    /// Aspect ratio (16:9, 9:16, 1:1)
    #[arg(long, default_value = "16:9")]
    pub aspect_ratio: AspectRatio,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub negative_prompt: Option<String>,

    /// Camera movement, repeatable ("Pan left", "Zoom in", ...)
    #[arg(long = "camera")]
    pub camera_movements: Vec<String>,

    #[arg(long)]
    pub cfg_scale: Option<f32>,
}

impl GenerateArgs {
    pub fn into_request(self) -> GenerationRequest {
        let params = GenerationParams {
            duration_secs: self.duration,
            aspect_ratio: self.aspect_ratio,
            seed: self.seed,
            negative_prompt: self.negative_prompt,
            camera_movements: self.camera_movements,
            cfg_scale: self.cfg_scale,
        };
        let mut request =
            GenerationRequest::new(self.clip_id, self.provider, self.prompt).with_params(params);
        if let Some(image) = self.image {
            request = request.with_reference_image(image, ReferenceRole::FirstFrame);
        }
        if let Some(subject) = self.subject {
            request = request.with_reference_image(subject, ReferenceRole::Subject);
        }
        if let (Some(video), Some(timestamp)) = (self.source_video, self.timestamp) {
            request = request.with_source_frame(video, timestamp);
        }
        request
    }
}

#[derive(ClapArgs, Debug)]
pub struct ExportArgs {
    /// Project the clips belong to
    #[arg(long)]
    pub project: String,

    /// Clip as <id>=<path>, repeated in timeline order
    #[arg(long = "clip", value_parser = parse_clip_arg, required = true)]
    pub clips: Vec<(String, PathBuf)>,

    #[arg(long, default_value_t = 1920)]
    pub width: u32,

    #[arg(long, default_value_t = 1080)]
    pub height: u32,

    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// Encode quality (low, medium, high)
    #[arg(long, default_value = "medium")]
    pub quality: ExportQuality,

    /// Drop audio from the export
    #[arg(long)]
    pub no_audio: bool,

    /// Re-encode clips that already match the output profile
    #[arg(long)]
    pub force_reencode: bool,
}

impl ExportArgs {
    pub fn project_id(&self) -> ProjectId {
        ProjectId::from_string(&self.project)
    }

    pub fn clip_ids(&self) -> Vec<ClipId> {
        self.clips.iter().map(|(id, _)| ClipId::from_string(id)).collect()
    }

    /// Completed clip records for the given files, in argument order.
    pub fn records(&self) -> Vec<ClipRecord> {
        self.clips
            .iter()
            .enumerate()
            .map(|(position, (id, path))| {
                ClipRecord::new(id.as_str(), self.project.as_str(), position as u32).completed(path)
            })
            .collect()
    }

    pub fn settings(&self) -> ExportSettings {
        ExportSettings {
            width: self.width,
            height: self.height,
            fps: self.fps,
            quality: self.quality,
            include_audio: !self.no_audio,
            force_reencode: self.force_reencode,
            ..ExportSettings::default()
        }
    }
}

/// Parse `<id>=<path>`.
fn parse_clip_arg(s: &str) -> Result<(String, PathBuf), String> {
    let (id, path) = s
        .split_once('=')
        .ok_or_else(|| format!("'{}' is not <id>=<path>", s))?;
    let id = id.trim();
    if id.is_empty() || path.trim().is_empty() {
        return Err(format!("'{}' is not <id>=<path>", s));
    }
    Ok((id.to_string(), PathBuf::from(path.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{ClipStatus, GenerationMode};

    #[test]
    fn test_generate_defaults() {
        let args = Args::parse_from([
            "reel", "generate", "--clip-id", "c1", "--provider", "minimax", "--prompt", "a fox",
        ]);
        let Command::Generate(generate) = args.command else {
            panic!("expected generate");
        };
        let request = generate.into_request();
        assert_eq!(request.provider, ProviderKind::Minimax);
        assert_eq!(request.params.duration_secs, DEFAULT_CLIP_DURATION_SECS);
        assert_eq!(request.params.aspect_ratio, AspectRatio::Landscape);
        assert_eq!(request.mode(), GenerationMode::TextToVideo);
    }

    #[test]
    fn test_generate_subject_and_camera() {
        let args = Args::parse_from([
            "reel", "generate", "--clip-id", "c2", "--provider", "minimax", "--prompt", "hero",
            "--subject", "hero.png", "--camera", "Pan left", "--camera", "Zoom in",
        ]);
        let Command::Generate(generate) = args.command else {
            panic!("expected generate");
        };
        let request = generate.into_request();
        assert_eq!(request.mode(), GenerationMode::SubjectToVideo);
        assert_eq!(request.params.camera_movements, vec!["Pan left", "Zoom in"]);
    }

    #[test]
    fn test_source_video_requires_timestamp() {
        let result = Args::try_parse_from([
            "reel", "generate", "--clip-id", "c3", "--provider", "segmind", "--prompt", "next",
            "--source-video", "prev.mp4",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_export_clip_args() {
        let args = Args::parse_from([
            "reel", "export", "--project", "p1", "--clip", "a=/clips/a.mp4", "--clip", "b=/clips/b.mp4",
            "--quality", "high", "--no-audio",
        ]);
        let Command::Export(export) = args.command else {
            panic!("expected export");
        };
        assert_eq!(export.clip_ids(), vec![ClipId::from_string("a"), ClipId::from_string("b")]);

        let records = export.records();
        assert_eq!(records[1].sequence_position, 1);
        assert_eq!(records[1].status, ClipStatus::Completed);
        assert_eq!(records[1].file_path, Some(PathBuf::from("/clips/b.mp4")));

        let settings = export.settings();
        assert_eq!(settings.quality, ExportQuality::High);
        assert!(!settings.include_audio);
        assert_eq!(settings.width, 1920);
    }

    #[test]
    fn test_parse_clip_arg() {
        assert!(parse_clip_arg("a=/x.mp4").is_ok());
        assert!(parse_clip_arg("no-separator").is_err());
        assert!(parse_clip_arg("=/x.mp4").is_err());
    }
}
