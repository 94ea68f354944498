//! `reel` command-line binary.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use reel_media::inspect_video;
use reel_models::{ClipRecord, ClipStatus, ExportStatus, PipelineEvent};
use reel_store::MemoryStore;
use reel_worker::{init_tracing, ClipPipeline, PipelineConfig};

use cli::{Args, Command, ExportArgs, GenerateArgs};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = PipelineConfig::from_env();

    match args.command {
        Command::Generate(generate_args) => generate(config, generate_args).await,
        Command::Export(export_args) => export(config, export_args).await,
        Command::Inspect { file } => inspect(&file).await,
    }
}

async fn generate(config: PipelineConfig, args: GenerateArgs) -> Result<()> {
    config
        .ensure_dirs()
        .await
        .context("Failed to create storage directories")?;

    let request = args.into_request();
    let clip_id = request.clip_id.clone();
    let store = Arc::new(MemoryStore::new().with_clips([ClipRecord::new(clip_id.clone(), "cli", 0)]).await);
    let pipeline = ClipPipeline::new(&config, store);

    info!(clip_id = %clip_id, provider = %request.provider, "Starting generation");
    let handle = pipeline.request_generation(request)?;
    let mut updates = handle.subscribe();

    let mut interrupted = false;
    loop {
        if updates.borrow_and_update().is_terminal() {
            break;
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                warn!(clip_id = %clip_id, "Interrupted, cancelling generation");
                pipeline.cancel_generation(&clip_id).await;
            }
        }
    }

    let state = pipeline
        .get_clip_status(&clip_id)
        .context("Clip state disappeared")?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    anyhow::ensure!(
        state.status == ClipStatus::Completed,
        "Generation of {} ended {}",
        clip_id,
        state.status
    );
    Ok(())
}

async fn export(config: PipelineConfig, args: ExportArgs) -> Result<()> {
    config
        .ensure_dirs()
        .await
        .context("Failed to create storage directories")?;

    let store = Arc::new(MemoryStore::new().with_clips(args.records()).await);
    let pipeline = ClipPipeline::new(&config, store);

    let mut events = pipeline.subscribe_events();
    let progress_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::ExportProgress {
                    status,
                    progress,
                    current_step,
                    ..
                }) => {
                    info!(
                        status = %status,
                        progress,
                        step = current_step.as_deref().unwrap_or(""),
                        "Export progress"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let handle = pipeline
        .start_export(args.project_id(), args.clip_ids(), args.settings())
        .await;
    let job_id = handle.job_id().clone();
    let mut updates = handle.subscribe();

    let mut interrupted = false;
    loop {
        if updates.borrow_and_update().is_terminal() {
            break;
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                warn!(job_id = %job_id, "Interrupted, cancelling export");
                pipeline.cancel_export(&job_id).await?;
            }
        }
    }
    progress_log.abort();

    let job = pipeline.get_export_status(&job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    anyhow::ensure!(
        job.status == ExportStatus::Completed,
        "Export {} ended {}: {}",
        job_id,
        job.status,
        job.error.as_deref().unwrap_or("no error recorded")
    );
    Ok(())
}

async fn inspect(file: &Path) -> Result<()> {
    let info = inspect_video(file)
        .await
        .with_context(|| format!("Failed to inspect {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
