//! Export job behaviour with fake media stages.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use reel_models::{
    ClipId, ClipRecord, ClipStatus, ExportJobId, ExportSettings, ExportStatus, GenerationRequest,
    PipelineEvent, ProjectId, ProviderKind,
};
use reel_store::{MemoryStore, RecordStore};
use reel_worker::WorkerError;

use common::{
    completed_record, count_files, harness, test_config, FakeNormalizer, Harness, ScriptedAdapter,
};

fn ids(names: &[&str]) -> Vec<ClipId> {
    names.iter().map(|name| ClipId::from_string(*name)).collect()
}

async fn setup(root: &TempDir, records: Vec<ClipRecord>, normalizer: FakeNormalizer) -> Harness {
    let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Minimax, []));
    let store = MemoryStore::new().with_clips(records).await;
    harness(test_config(root.path()), adapter, store, normalizer)
}

/// Two completed clips of 3s and 4s export to one 7s file.
#[tokio::test]
async fn test_export_completed_clips() {
    let root = TempDir::new().unwrap();
    let clips = TempDir::new().unwrap();
    let records = vec![
        completed_record(clips.path(), "a", 0, 3.0).await,
        completed_record(clips.path(), "b", 1, 4.0).await,
    ];
    let h = setup(&root, records, FakeNormalizer::new()).await;

    let handle = h
        .pipeline
        .start_export(ProjectId::from_string("p1"), ids(&["a", "b"]), ExportSettings::default())
        .await;
    let job_id = handle.job_id().clone();
    let job = handle.wait().await;

    assert_eq!(job.status, ExportStatus::Completed, "error: {:?}", job.error);
    assert_eq!(job.overall_progress(), 100);
    assert!((job.duration_secs.unwrap() - 7.0).abs() < 0.05);
    assert!(job.error.is_none());
    assert!(job.started_at.is_some() && job.completed_at.is_some());

    let output = job.output_path.clone().unwrap();
    assert_eq!(
        output,
        h.config.output_dir.join(format!("p1_{}.mp4", job_id))
    );
    assert!(output.exists());
    assert_eq!(job.file_size, Some(std::fs::metadata(&output).unwrap().len()));

    // Joined in caller order, and nothing left in staging
    let joined = h.concatenator.joined.lock().unwrap().clone();
    assert!(joined[0].to_string_lossy().contains("000_a"));
    assert!(joined[1].to_string_lossy().contains("001_b"));
    assert_eq!(count_files(&h.config.staging_dir), 0);

    let stored = h.store.get_export_job(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExportStatus::Completed);
    assert_eq!(stored.output_path, Some(output));
}

/// A clip that is still pending fails validation; no output is written.
#[tokio::test]
async fn test_export_with_pending_clip_fails() {
    let root = TempDir::new().unwrap();
    let clips = TempDir::new().unwrap();
    let records = vec![
        completed_record(clips.path(), "a", 0, 3.0).await,
        ClipRecord::new("b", "p1", 1),
    ];
    let h = setup(&root, records, FakeNormalizer::new()).await;

    let job = h
        .pipeline
        .start_export(ProjectId::from_string("p1"), ids(&["a", "b"]), ExportSettings::default())
        .await
        .wait()
        .await;

    assert_eq!(job.status, ExportStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("Clip b is not ready for export"), "{}", error);
    assert!(error.contains("pending"));
    assert!(job.output_path.is_none());
    assert_eq!(h.normalizer.calls(), 0);
    assert_eq!(count_files(&h.config.output_dir), 0);
    assert_eq!(count_files(&h.config.staging_dir), 0);
}

/// Cancelling while clips are normalizing leaves nothing in staging.
#[tokio::test]
async fn test_cancel_during_normalizing() {
    let root = TempDir::new().unwrap();
    let clips = TempDir::new().unwrap();
    let mut records = Vec::new();
    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        records.push(completed_record(clips.path(), name, i as u32, 2.0).await);
    }
    let normalizer = FakeNormalizer::new().with_delay(Duration::from_millis(150));
    let h = setup(&root, records, normalizer).await;

    let handle = h
        .pipeline
        .start_export(
            ProjectId::from_string("p1"),
            ids(&["a", "b", "c", "d"]),
            ExportSettings::default(),
        )
        .await;
    let job_id = handle.job_id().clone();
    let mut updates = handle.subscribe();
    updates
        .wait_for(|job| job.status == ExportStatus::Normalizing)
        .await
        .unwrap();

    h.pipeline.cancel_export(&job_id).await.unwrap();
    let job = handle.wait().await;

    assert_eq!(job.status, ExportStatus::Cancelled);
    assert!(job.error.is_some());
    assert!(job.output_path.is_none());
    // Clips already encoding finish; the rest never start
    assert!(h.normalizer.calls() < 4);
    assert_eq!(count_files(&h.config.staging_dir), 0);
    assert_eq!(count_files(&h.config.output_dir), 0);

    // Cancelling a finished job changes nothing
    let again = h.pipeline.cancel_export(&job_id).await.unwrap();
    assert_eq!(again.status, ExportStatus::Cancelled);
}

#[tokio::test]
async fn test_normalization_failure_fails_job_and_cleans_up() {
    let root = TempDir::new().unwrap();
    let clips = TempDir::new().unwrap();
    let records = vec![
        completed_record(clips.path(), "a", 0, 3.0).await,
        completed_record(clips.path(), "broken", 1, 3.0).await,
        completed_record(clips.path(), "c", 2, 3.0).await,
    ];
    let h = setup(&root, records, FakeNormalizer::new().failing_on("broken")).await;

    let job = h
        .pipeline
        .start_export(
            ProjectId::from_string("p1"),
            ids(&["a", "broken", "c"]),
            ExportSettings::default(),
        )
        .await
        .wait()
        .await;

    assert_eq!(job.status, ExportStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.starts_with("normalizing stage failed"), "{}", error);
    assert!(error.contains("no video stream"));
    assert!(h.concatenator.joined.lock().unwrap().is_empty());
    assert_eq!(count_files(&h.config.staging_dir), 0);
    assert_eq!(count_files(&h.config.output_dir), 0);
}

#[tokio::test]
async fn test_duplicate_clip_is_invalid_sequence() {
    let root = TempDir::new().unwrap();
    let clips = TempDir::new().unwrap();
    let records = vec![completed_record(clips.path(), "a", 0, 3.0).await];
    let h = setup(&root, records, FakeNormalizer::new()).await;

    let job = h
        .pipeline
        .start_export(ProjectId::from_string("p1"), ids(&["a", "a"]), ExportSettings::default())
        .await
        .wait()
        .await;

    assert_eq!(job.status, ExportStatus::Failed);
    assert!(job.error.unwrap().contains("appears more than once"));
}

#[tokio::test]
async fn test_empty_export_fails_at_concatenation() {
    let root = TempDir::new().unwrap();
    let h = setup(&root, Vec::new(), FakeNormalizer::new()).await;

    let job = h
        .pipeline
        .start_export(ProjectId::from_string("p1"), Vec::new(), ExportSettings::default())
        .await
        .wait()
        .await;

    assert_eq!(job.status, ExportStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.starts_with("concatenating stage failed"), "{}", error);
    assert!(error.contains("empty"));
}

#[tokio::test]
async fn test_missing_clip_file() {
    let root = TempDir::new().unwrap();
    let record = ClipRecord::new("a", "p1", 0).completed("/nonexistent/a.mp4");
    let h = setup(&root, vec![record], FakeNormalizer::new()).await;

    let job = h
        .pipeline
        .start_export(ProjectId::from_string("p1"), ids(&["a"]), ExportSettings::default())
        .await
        .wait()
        .await;

    assert_eq!(job.status, ExportStatus::Failed);
    assert!(job.error.unwrap().contains("does not exist"));
}

/// Clips generated through the dispatcher are exported from tracker state.
#[tokio::test]
async fn test_generate_then_export() {
    let root = TempDir::new().unwrap();
    let h = setup(&root, Vec::new(), FakeNormalizer::new()).await;

    for clip in ["g1", "g2"] {
        let mut request = GenerationRequest::new(clip, ProviderKind::Minimax, "waves");
        request.params.duration_secs = 6;
        let state = h.pipeline.request_generation(request).unwrap().wait().await;
        assert_eq!(state.status, ClipStatus::Completed);
    }

    let job = h
        .pipeline
        .start_export(ProjectId::from_string("p1"), ids(&["g1", "g2"]), ExportSettings::default())
        .await
        .wait()
        .await;

    assert_eq!(job.status, ExportStatus::Completed, "error: {:?}", job.error);
    assert!((job.duration_secs.unwrap() - 12.0).abs() < 0.05);
    // Generated clips stay; only the export's own scratch files are removed
    assert_eq!(count_files(&h.config.staging_dir), 2);
}

#[tokio::test]
async fn test_project_export_uses_timeline_order() {
    let root = TempDir::new().unwrap();
    let clips = TempDir::new().unwrap();
    let records = vec![
        completed_record(clips.path(), "second", 1, 1.0).await,
        completed_record(clips.path(), "first", 0, 2.0).await,
    ];
    let h = setup(&root, records, FakeNormalizer::new()).await;

    let handle = h
        .pipeline
        .exports()
        .start_project(ProjectId::from_string("p1"), ExportSettings::default())
        .await
        .unwrap();
    assert_eq!(handle.snapshot().clip_ids, ids(&["first", "second"]));
    assert_eq!(handle.wait().await.status, ExportStatus::Completed);
}

#[tokio::test]
async fn test_export_events_and_status() {
    let root = TempDir::new().unwrap();
    let clips = TempDir::new().unwrap();
    let records = vec![completed_record(clips.path(), "a", 0, 3.0).await];
    let h = setup(&root, records, FakeNormalizer::new()).await;
    let mut events = h.pipeline.subscribe_events();

    let handle = h
        .pipeline
        .start_export(ProjectId::from_string("p1"), ids(&["a"]), ExportSettings::default())
        .await;
    let job_id = handle.job_id().clone();
    handle.wait().await;

    let status = h.pipeline.get_export_status(&job_id).await.unwrap();
    assert_eq!(status.status, ExportStatus::Completed);
    assert!(!status.processing_log.is_empty());

    let mut statuses = Vec::new();
    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        match event {
            PipelineEvent::ExportProgress { status, .. } => {
                if statuses.last() != Some(&status) {
                    statuses.push(status);
                }
            }
            PipelineEvent::ExportFinished { status, output_path, .. } => {
                finished = Some((status, output_path));
            }
            _ => {}
        }
    }
    assert_eq!(
        statuses,
        vec![
            ExportStatus::Queued,
            ExportStatus::Validating,
            ExportStatus::Normalizing,
            ExportStatus::Concatenating,
            ExportStatus::Finalizing,
            ExportStatus::Completed,
        ]
    );
    let (status, output_path) = finished.unwrap();
    assert_eq!(status, ExportStatus::Completed);
    assert!(output_path.is_some());
}

#[tokio::test]
async fn test_unknown_export_job() {
    let root = TempDir::new().unwrap();
    let h = setup(&root, Vec::new(), FakeNormalizer::new()).await;

    let missing = ExportJobId::from_string("nope");
    assert!(matches!(
        h.pipeline.get_export_status(&missing).await,
        Err(WorkerError::ExportNotFound(_))
    ));
    assert!(matches!(
        h.pipeline.cancel_export(&missing).await,
        Err(WorkerError::ExportNotFound(_))
    ));
}

/// Finished jobs leave memory once stored and are answered from the store.
#[tokio::test]
async fn test_finished_job_is_served_from_store() {
    let root = TempDir::new().unwrap();
    let clips = TempDir::new().unwrap();
    let records = vec![completed_record(clips.path(), "a", 0, 3.0).await];
    let h = setup(&root, records, FakeNormalizer::new()).await;

    let handle = h
        .pipeline
        .start_export(ProjectId::from_string("p1"), ids(&["a"]), ExportSettings::default())
        .await;
    let job_id = handle.job_id().clone();
    assert!(h.pipeline.exports().subscribe(&job_id).is_some());
    let finished = handle.wait().await;
    assert_eq!(finished.status, ExportStatus::Completed);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.pipeline.exports().subscribe(&job_id).is_none());

    let status = h.pipeline.get_export_status(&job_id).await.unwrap();
    assert_eq!(status, finished);
    let again = h.pipeline.cancel_export(&job_id).await.unwrap();
    assert_eq!(again.status, ExportStatus::Completed);
}
