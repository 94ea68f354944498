//! Clip generation dispatcher and export pipeline.
//!
//! This crate provides:
//! - The clip state tracker and the bounded, retrying generation dispatcher
//! - The export job manager (validate, normalize, concatenate, finalize)
//! - The `ClipPipeline` facade over both
//! - Configuration, event stream, metrics and job logging

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod export;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod tracker;

pub use config::PipelineConfig;
pub use dispatcher::{DispatcherSettings, GenerationDispatcher, JobHandle};
pub use error::{DispatchError, ExportError, StageError, WorkerError, WorkerResult};
pub use events::EventBus;
pub use export::{sequence_from_records, ExportJobHandle, ExportJobManager, ExportManagerSettings};
pub use logging::{init_tracing, JobLogger};
pub use pipeline::ClipPipeline;
pub use retry::RetryPolicy;
pub use tracker::ClipStateTracker;
