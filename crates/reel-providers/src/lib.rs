//! Video generation provider adapters.
//!
//! Each third-party service is wrapped in a [`ProviderAdapter`] that turns a
//! [`reel_models::GenerationRequest`] into one staged video file, or a
//! classified [`ProviderError`] the dispatcher uses to decide on retries.

pub mod adapter;
pub mod capabilities;
pub mod download;
pub mod error;
pub mod minimax;
pub mod registry;
pub mod segmind;

pub use adapter::{GenerationContext, ProviderAdapter, StagingPaths};
pub use capabilities::{DurationSupport, ProviderCapabilities};
pub use error::{ProviderError, ProviderErrorKind, ProviderResult};
pub use minimax::{MinimaxAdapter, MinimaxConfig};
pub use registry::ProviderRegistry;
pub use segmind::{SegmindAdapter, SegmindConfig};
