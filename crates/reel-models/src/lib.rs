//! Shared data models for the clip generation and export pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Generation requests and generated assets
//! - Clip lifecycle state and persisted clip records
//! - Normalization profiles and export settings
//! - Export jobs and their progress
//! - Event stream messages

pub mod clip;
pub mod encoding;
pub mod event;
pub mod export;
pub mod generation;
pub mod ids;
pub mod provider;

// Re-export common types
pub use clip::{ClipRecord, ClipState, ClipStatus};
pub use encoding::{
    AudioPolicy, BitratePolicy, ContainerFormat, ExportQuality, ExportSettings, NormalizationProfile,
};
pub use event::PipelineEvent;
pub use export::{ExportJob, ExportStage, ExportStatus, LogEntry, StageProgress};
pub use generation::{
    GeneratedAsset, GenerationParams, GenerationRequest, ReferenceImage, ReferenceRole, SourceFrame,
};
pub use ids::{ClipId, ExportJobId, ProjectId};
pub use provider::{AspectRatio, GenerationMode, ParseEnumError, ProviderKind};
