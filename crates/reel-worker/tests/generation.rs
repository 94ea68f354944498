//! Generation dispatcher behaviour against scripted providers.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use reel_models::{ClipId, ClipRecord, ClipStatus, GenerationRequest, PipelineEvent, ProviderKind};
use reel_store::{MemoryStore, RecordStore};
use reel_worker::DispatchError;

use common::{count_files, harness, test_config, FakeNormalizer, ScriptedAdapter, Step};

fn request(clip: &str) -> GenerationRequest {
    GenerationRequest::new(clip, ProviderKind::Minimax, "a lighthouse at dusk")
}

/// Transient twice, then success: three attempts in total.
#[tokio::test]
async fn test_transient_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(
        ProviderKind::Minimax,
        [Step::Transient, Step::Transient, Step::Succeed],
    ));
    let store = MemoryStore::new()
        .with_clips([ClipRecord::new("c1", "p1", 0)])
        .await;
    let h = harness(test_config(dir.path()), adapter.clone(), store, FakeNormalizer::new());

    let started = Instant::now();
    let handle = h.pipeline.request_generation(request("c1")).unwrap();
    let state = handle.wait().await;

    assert_eq!(state.status, ClipStatus::Completed);
    assert_eq!(state.attempts, 3);
    assert_eq!(adapter.calls(), 3);
    // Two backoffs: 20ms then 40ms
    assert!(started.elapsed() >= Duration::from_millis(60));

    let path = state.output_path.clone().unwrap();
    assert!(path.exists());

    // Persisted just after the tracker transition
    tokio::time::sleep(Duration::from_millis(20)).await;
    let record = h.store.get_clip(&ClipId::from_string("c1")).await.unwrap().unwrap();
    assert_eq!(record.status, ClipStatus::Completed);
    assert_eq!(record.file_path, Some(path));
    assert_eq!(record.resolution.as_deref(), Some("1280x720"));
    assert!(record.error_message.is_none());
}

/// A permanent error fails at once, without a backoff.
#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Minimax, [Step::Permanent]));
    let mut config = test_config(dir.path());
    config.retry_base_delay = Duration::from_secs(2);
    config.retry_max_delay = Duration::from_secs(30);
    let store = MemoryStore::new()
        .with_clips([ClipRecord::new("c1", "p1", 0)])
        .await;
    let h = harness(config, adapter.clone(), store, FakeNormalizer::new());

    let started = Instant::now();
    let state = h.pipeline.request_generation(request("c1")).unwrap().wait().await;

    assert_eq!(state.status, ClipStatus::Failed);
    assert_eq!(state.attempts, 1);
    assert_eq!(adapter.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(state.last_error.unwrap().contains("prompt rejected"));

    // Persisted just after the tracker transition
    tokio::time::sleep(Duration::from_millis(20)).await;
    let record = h.store.get_clip(&ClipId::from_string("c1")).await.unwrap().unwrap();
    assert_eq!(record.status, ClipStatus::Failed);
    assert!(record.error_message.unwrap().contains("prompt rejected"));
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Minimax, [Step::Unauthorized]));
    let h = harness(test_config(dir.path()), adapter.clone(), MemoryStore::new(), FakeNormalizer::new());

    let state = h.pipeline.request_generation(request("c1")).unwrap().wait().await;
    assert_eq!(state.status, ClipStatus::Failed);
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Minimax, [Step::Transient; 10]));
    let h = harness(test_config(dir.path()), adapter.clone(), MemoryStore::new(), FakeNormalizer::new());

    let state = h.pipeline.request_generation(request("c1")).unwrap().wait().await;
    assert_eq!(state.status, ClipStatus::Failed);
    // First attempt plus three retries
    assert_eq!(state.attempts, 4);
    assert_eq!(adapter.calls(), 4);
    assert!(state.last_error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_duplicate_request_rejected_while_in_flight() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(
        ScriptedAdapter::new(ProviderKind::Minimax, []).with_latency(Duration::from_millis(100)),
    );
    let h = harness(test_config(dir.path()), adapter.clone(), MemoryStore::new(), FakeNormalizer::new());

    let handle = h.pipeline.request_generation(request("c1")).unwrap();
    let err = h.pipeline.request_generation(request("c1")).unwrap_err();
    assert_eq!(err, DispatchError::AlreadyInFlight(ClipId::from_string("c1")));

    assert_eq!(handle.wait().await.status, ClipStatus::Completed);
    assert_eq!(adapter.calls(), 1);

    // A finished clip can be generated again
    let again = h.pipeline.request_generation(request("c1")).unwrap().wait().await;
    assert_eq!(again.status, ClipStatus::Completed);
    assert_eq!(again.attempts, 1);
}

#[tokio::test]
async fn test_unknown_provider() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Minimax, []));
    let h = harness(test_config(dir.path()), adapter, MemoryStore::new(), FakeNormalizer::new());

    let err = h
        .pipeline
        .request_generation(GenerationRequest::new("c1", ProviderKind::Segmind, "x"))
        .unwrap_err();
    assert_eq!(err, DispatchError::UnknownProvider(ProviderKind::Segmind));
    assert!(h.pipeline.get_clip_status(&ClipId::from_string("c1")).is_none());
}

#[tokio::test]
async fn test_pool_bounds_concurrency() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(
        ScriptedAdapter::new(ProviderKind::Minimax, []).with_latency(Duration::from_millis(50)),
    );
    let mut config = test_config(dir.path());
    config.max_concurrent_generations = 2;
    let h = harness(config, adapter.clone(), MemoryStore::new(), FakeNormalizer::new());

    let handles: Vec<_> = (0..6)
        .map(|i| h.pipeline.request_generation(request(&format!("c{}", i))).unwrap())
        .collect();
    for handle in handles {
        assert_eq!(handle.wait().await.status, ClipStatus::Completed);
    }
    assert_eq!(adapter.calls(), 6);
    assert!(adapter.peak_concurrency() <= 2);
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_retries() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Minimax, [Step::Transient; 4]));
    let mut config = test_config(dir.path());
    config.retry_base_delay = Duration::from_secs(5);
    config.retry_max_delay = Duration::from_secs(5);
    let h = harness(config, adapter.clone(), MemoryStore::new(), FakeNormalizer::new());

    let handle = h.pipeline.request_generation(request("c1")).unwrap();
    let mut updates = handle.subscribe();
    updates
        .wait_for(|state| state.last_error.is_some())
        .await
        .unwrap();

    let state = h.pipeline.cancel_generation(&ClipId::from_string("c1")).await.unwrap();
    assert_eq!(state.status, ClipStatus::Cancelled);
    assert_eq!(handle.wait().await.status, ClipStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn test_cancel_in_flight_discards_result() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(
        ScriptedAdapter::new(ProviderKind::Minimax, []).with_latency(Duration::from_millis(100)),
    );
    let config = test_config(dir.path());
    let staging = config.staging_dir.clone();
    let h = harness(config, adapter.clone(), MemoryStore::new(), FakeNormalizer::new());

    let handle = h.pipeline.request_generation(request("c1")).unwrap();
    let mut updates = handle.subscribe();
    updates
        .wait_for(|state| state.status == ClipStatus::Generating)
        .await
        .unwrap();

    h.pipeline.cancel_generation(&ClipId::from_string("c1")).await;
    let state = handle.wait().await;
    assert_eq!(state.status, ClipStatus::Cancelled);
    assert!(state.output_path.is_none());

    // The late result is dropped and its file removed
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        h.pipeline.get_clip_status(&ClipId::from_string("c1")).unwrap().status,
        ClipStatus::Cancelled
    );
    assert_eq!(adapter.calls(), 1);
    assert_eq!(count_files(&staging), 0);
}

/// A cancelled lifecycle's late result must not land on the clip's next lifecycle.
#[tokio::test]
async fn test_resubmit_after_cancel_ignores_late_result() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(
        ScriptedAdapter::new(ProviderKind::Minimax, []).with_latency(Duration::from_millis(600)),
    );
    let config = test_config(dir.path());
    let staging = config.staging_dir.clone();
    let h = harness(config, adapter.clone(), MemoryStore::new(), FakeNormalizer::new());
    let id = ClipId::from_string("c1");

    let first = h.pipeline.request_generation(request("c1")).unwrap();
    first
        .subscribe()
        .wait_for(|state| state.status == ClipStatus::Generating)
        .await
        .unwrap();
    h.pipeline.cancel_generation(&id).await;
    assert_eq!(first.wait().await.status, ClipStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let second = h.pipeline.request_generation(request("c1")).unwrap();
    second
        .subscribe()
        .wait_for(|state| state.status == ClipStatus::Generating)
        .await
        .unwrap();

    // The first call returns while the second is still running
    tokio::time::sleep(Duration::from_millis(450)).await;
    let midway = h.pipeline.get_clip_status(&id).unwrap();
    assert_eq!(midway.status, ClipStatus::Generating);
    assert!(midway.output_path.is_none());

    let state = second.wait().await;
    assert_eq!(state.status, ClipStatus::Completed);
    assert_eq!(state.attempts, 1);
    assert_eq!(adapter.calls(), 2);

    let output = state.output_path.unwrap();
    assert!(output.exists());
    assert_eq!(count_files(&staging), 1);
}

/// A clip waiting for a pool slot is cancelled without ever reaching the provider.
#[tokio::test]
async fn test_cancel_while_queued_behind_full_pool() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(
        ScriptedAdapter::new(ProviderKind::Minimax, []).with_latency(Duration::from_millis(150)),
    );
    let mut config = test_config(dir.path());
    config.max_concurrent_generations = 1;
    let h = harness(config, adapter.clone(), MemoryStore::new(), FakeNormalizer::new());

    let running = h.pipeline.request_generation(request("c1")).unwrap();
    running
        .subscribe()
        .wait_for(|state| state.status == ClipStatus::Generating)
        .await
        .unwrap();
    let queued = h.pipeline.request_generation(request("c2")).unwrap();
    assert_eq!(queued.state().status, ClipStatus::Pending);

    let state = h.pipeline.cancel_generation(&ClipId::from_string("c2")).await.unwrap();
    assert_eq!(state.status, ClipStatus::Cancelled);
    assert_eq!(state.attempts, 0);

    assert_eq!(running.wait().await.status, ClipStatus::Completed);
    assert_eq!(queued.wait().await.status, ClipStatus::Cancelled);
    assert_eq!(adapter.calls(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.pipeline.dispatcher().active_jobs(), 0);

    // The freed slot serves the next request
    let next = h.pipeline.request_generation(request("c3")).unwrap().wait().await;
    assert_eq!(next.status, ClipStatus::Completed);
}

#[tokio::test]
async fn test_prune_finished_clips() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Minimax, []));
    let store = MemoryStore::new()
        .with_clips([ClipRecord::new("c1", "p1", 0)])
        .await;
    let h = harness(test_config(dir.path()), adapter, store, FakeNormalizer::new());
    let id = ClipId::from_string("c1");

    h.pipeline.request_generation(request("c1")).unwrap().wait().await;
    assert_eq!(h.pipeline.prune_finished_clips(Duration::from_secs(3600)), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.pipeline.prune_finished_clips(Duration::ZERO), 1);
    assert!(h.pipeline.get_clip_status(&id).is_none());

    // The persisted record still carries the result
    let record = h.store.get_clip(&id).await.unwrap().unwrap();
    assert_eq!(record.status, ClipStatus::Completed);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Minimax, []));
    let h = harness(test_config(dir.path()), adapter, MemoryStore::new(), FakeNormalizer::new());
    let id = ClipId::from_string("c1");

    assert!(h.pipeline.cancel_generation(&id).await.is_none());

    let state = h.pipeline.request_generation(request("c1")).unwrap().wait().await;
    assert_eq!(state.status, ClipStatus::Completed);

    let after = h.pipeline.cancel_generation(&id).await.unwrap();
    assert_eq!(after.status, ClipStatus::Completed);
    assert_eq!(after.output_path, state.output_path);
}

#[tokio::test]
async fn test_events_follow_lifecycle() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(ProviderKind::Minimax, [Step::Transient]));
    let h = harness(test_config(dir.path()), adapter, MemoryStore::new(), FakeNormalizer::new());
    let mut events = h.pipeline.subscribe_events();

    h.pipeline.request_generation(request("c1")).unwrap().wait().await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::ClipStatusChanged { status, attempt, .. } = event {
            seen.push((status, attempt));
        }
    }
    assert_eq!(
        seen,
        vec![
            (ClipStatus::Pending, 0),
            (ClipStatus::Generating, 1),
            (ClipStatus::Generating, 1),
            (ClipStatus::Generating, 2),
            (ClipStatus::Completed, 2),
        ]
    );
}

#[tokio::test]
async fn test_shutdown_refuses_new_work() {
    let dir = TempDir::new().unwrap();
    let adapter = Arc::new(
        ScriptedAdapter::new(ProviderKind::Minimax, []).with_latency(Duration::from_millis(200)),
    );
    let mut config = test_config(dir.path());
    config.max_concurrent_generations = 1;
    let h = harness(config, adapter, MemoryStore::new(), FakeNormalizer::new());

    let running = h.pipeline.request_generation(request("c1")).unwrap();
    let queued = h.pipeline.request_generation(request("c2")).unwrap();
    h.pipeline.shutdown().await;

    assert_eq!(running.wait().await.status, ClipStatus::Cancelled);
    assert_eq!(queued.wait().await.status, ClipStatus::Cancelled);
    assert_eq!(
        h.pipeline.request_generation(request("c3")).unwrap_err(),
        DispatchError::Shutdown
    );
}
