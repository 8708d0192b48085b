//! End-to-end ingest runs against the in-process media service
//!
//! These tests drive [`Ingestor::run`] through both upload modes and check
//! the resulting asset state:
//! - Direct mode registers N files plus one primary `.ism`
//! - External mode polls until nothing is pending, then cleans up
//! - Publication reuses the shared streaming policy
//! - Failures (batch, empty folder, cancellation, timeout) abort the run

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bulk_ingest::{IngestConfig, IngestError, IngestMode, Ingestor, InMemoryMediaService, MediaService};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn watch_folder(files: &[(&str, &[u8])]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

fn small_blocks() -> IngestConfig {
    IngestConfig {
        block_size_bytes: 1024,
        ..IngestConfig::default()
    }
}

fn ingestor(service: &Arc<InMemoryMediaService>, config: IngestConfig) -> Ingestor {
    Ingestor::new(service.clone(), config)
}

// ============================================================================
// Direct Mode
// ============================================================================

#[tokio::test]
async fn test_direct_ingest_publishes_primary_manifest() {
    let folder = watch_folder(&[("a.mp4", &[1u8; 3000]), ("b.mp4", &[2u8; 10])]);
    let service = Arc::new(InMemoryMediaService::new());

    let outcome = ingestor(&service, small_blocks())
        .run(folder.path(), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<_> = outcome.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["a.mp4", "b.mp4", "manifest.ism"]);

    let primaries: Vec<_> = outcome.files.iter().filter(|f| f.is_primary).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].name, "manifest.ism");
    assert!(outcome.files.iter().all(|f| f.is_uploaded()));

    for (_, url) in outcome.publication.playback.entries() {
        assert!(!url.as_str().is_empty());
        assert!(url.path().contains("/manifest.ism/manifest"));
    }

    assert_eq!(service.file_content(&outcome.asset.id, "a.mp4").unwrap(), vec![1u8; 3000]);
    let ism = service.file_content(&outcome.asset.id, "manifest.ism").unwrap();
    let ism = String::from_utf8(ism).unwrap();
    assert!(ism.contains(r#"src="a.mp4""#));
    assert!(ism.contains(r#"src="b.mp4""#));
}

#[tokio::test]
async fn test_direct_ingest_registers_n_plus_one_files() {
    let files: Vec<(String, Vec<u8>)> = (0..25)
        .map(|i| (format!("clip_{i:02}.mp4"), vec![i as u8; 100 + i]))
        .collect();
    let borrowed: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(n, c)| (n.as_str(), c.as_slice()))
        .collect();
    let folder = watch_folder(&borrowed);
    let service = Arc::new(InMemoryMediaService::new());

    let outcome = ingestor(&service, small_blocks())
        .run(folder.path(), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.files.len(), 26);
    assert_eq!(outcome.manifest_file.name, "clip.ism");
    assert!(outcome.manifest_file.is_primary);
}

#[tokio::test]
async fn test_asset_carries_correlation_id() {
    let folder = watch_folder(&[("a.mp4", b"data")]);
    let service = Arc::new(InMemoryMediaService::new());

    let outcome = ingestor(&service, small_blocks())
        .run(folder.path(), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap();

    let stored = service.asset(&outcome.asset.id).unwrap();
    let id = outcome.correlation_id;
    assert_eq!(stored.name, format!("ingest-{id}"));
    assert_eq!(stored.alternate_id, Some(format!("ingest-id-{id}")));
}

#[tokio::test]
async fn test_direct_batch_failure_aborts_run() {
    let folder = watch_folder(&[("a.mp4", b"aaaa"), ("b.mp4", b"bbbb")]);
    let service = Arc::new(InMemoryMediaService::new());
    service.fail_uploads_for("b.mp4");

    let err = ingestor(&service, small_blocks())
        .run(folder.path(), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        IngestError::BatchUpload { failures, total } => {
            assert_eq!(total, 2);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].file, "b.mp4");
        }
        other => panic!("unexpected error: {other}"),
    }
    // no origin locator was minted for the partial asset
    assert!(service.locators().is_empty());
}

#[tokio::test]
async fn test_non_media_folder_has_nothing_to_publish() {
    let folder = watch_folder(&[("notes.txt", b"hello")]);
    let service = Arc::new(InMemoryMediaService::new());

    let err = ingestor(&service, small_blocks())
        .run(folder.path(), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NoMediaFiles(_)));
}

#[tokio::test]
async fn test_empty_folder_fails_before_any_remote_call() {
    let folder = watch_folder(&[]);
    let service = Arc::new(InMemoryMediaService::new());

    let err = ingestor(&service, small_blocks())
        .run(folder.path(), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::EmptySource(_)));
    assert!(service.list_access_policies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_folder() {
    let service = Arc::new(InMemoryMediaService::new());
    let err = ingestor(&service, small_blocks())
        .run(Path::new("/nonexistent/watch"), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::SourceDirectory { .. }));
}

// ============================================================================
// Publication
// ============================================================================

#[tokio::test]
async fn test_second_run_reuses_streaming_policy() {
    let service = Arc::new(InMemoryMediaService::new());
    let ingest = ingestor(&service, small_blocks());

    let first_folder = watch_folder(&[("a.mp4", b"first")]);
    let first = ingest
        .run(first_folder.path(), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!first.publication.policy_reused);

    let second_folder = watch_folder(&[("b.mp4", b"second")]);
    let second = ingest
        .run(second_folder.path(), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap();
    assert!(second.publication.policy_reused);
    assert_eq!(first.publication.policy.id, second.publication.policy.id);

    let streaming: Vec<_> = service
        .list_access_policies()
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.name == "Streaming policy")
        .collect();
    assert_eq!(streaming.len(), 1);
    assert_eq!(service.locators().len(), 2);
}

#[tokio::test]
async fn test_origin_locator_is_back_dated() {
    let folder = watch_folder(&[("a.mp4", b"data")]);
    let service = Arc::new(InMemoryMediaService::new());
    let before = chrono::Utc::now();

    let outcome = ingestor(&service, small_blocks())
        .run(folder.path(), IngestMode::Direct, &CancellationToken::new())
        .await
        .unwrap();

    let start = outcome.publication.locator.start_time.unwrap();
    assert!(start <= before - chrono::Duration::minutes(4));
}

// ============================================================================
// External Mode
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_external_ingest_polls_until_finished() {
    let folder = watch_folder(&[("c.mp4", b"external")]);
    let service = Arc::new(InMemoryMediaService::new());
    service.complete_external_uploads_after(3);

    let started = tokio::time::Instant::now();
    let outcome = ingestor(&service, IngestConfig::default())
        .run(folder.path(), IngestMode::External, &CancellationToken::new())
        .await
        .unwrap();

    // two pending cycles, the third fetch sees pending == 0
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert!(service.manifest_names().is_empty());

    let names: Vec<_> = outcome.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["c.ism", "c.mp4"]);
    assert_eq!(outcome.manifest_file.name, "c.ism");
}

#[tokio::test(start_paused = true)]
async fn test_external_poll_timeout() {
    let folder = watch_folder(&[("c.mp4", b"external")]);
    let service = Arc::new(InMemoryMediaService::new());
    let config = IngestConfig {
        poll_timeout_secs: Some(30),
        ..IngestConfig::default()
    };

    let err = ingestor(&service, config)
        .run(folder.path(), IngestMode::External, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::PollTimeout { pending: 1, .. }));
    assert_eq!(service.manifest_names().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_external_cancellation() {
    let folder = watch_folder(&[("c.mp4", b"external")]);
    let service = Arc::new(InMemoryMediaService::new());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        trigger.cancel();
    });

    let err = ingestor(&service, IngestConfig::default())
        .run(folder.path(), IngestMode::External, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Cancelled));
}

#[tokio::test]
async fn test_manifests_with_same_file_names_are_independent() {
    let service = Arc::new(InMemoryMediaService::new());
    let names = vec!["a.mp4".to_string(), "b.mp4".to_string()];

    let first_asset = service.create_asset("one").await.unwrap();
    let second_asset = service.create_asset("two").await.unwrap();
    let first = service.create_ingest_manifest("ingest-one").await.unwrap();
    let second = service.create_ingest_manifest("ingest-two").await.unwrap();
    service
        .register_manifest_files(&first.id, &first_asset.id, &names)
        .await
        .unwrap();
    service
        .register_manifest_files(&second.id, &second_asset.id, &names)
        .await
        .unwrap();

    service.finish_manifest_file(&first.id, "a.mp4").unwrap();
    service.finish_manifest_file(&first.id, "b.mp4").unwrap();

    let first = service.get_ingest_manifest(&first.id).await.unwrap();
    let second = service.get_ingest_manifest(&second.id).await.unwrap();
    assert!(first.statistics.is_finished());
    assert_eq!(first.statistics.percent_complete(), 100.0);
    assert_eq!(second.statistics.pending_files_count, 2);
    assert_eq!(second.statistics.percent_complete(), 0.0);
}

#[tokio::test]
async fn test_manifests_sharing_one_asset_track_their_own_files() {
    let service = Arc::new(InMemoryMediaService::new());
    let names = vec!["a.mp4".to_string(), "b.mp4".to_string()];

    let asset = service.create_asset("shared").await.unwrap();
    let first = service.create_ingest_manifest("ingest-one").await.unwrap();
    let second = service.create_ingest_manifest("ingest-two").await.unwrap();
    service
        .register_manifest_files(&first.id, &asset.id, &names)
        .await
        .unwrap();
    service
        .register_manifest_files(&second.id, &asset.id, &names)
        .await
        .unwrap();

    // both manifests point at the same two asset files
    assert_eq!(service.list_asset_files(&asset.id).await.unwrap().len(), 2);

    service.finish_manifest_file(&first.id, "a.mp4").unwrap();
    service.finish_manifest_file(&first.id, "b.mp4").unwrap();

    let first = service.get_ingest_manifest(&first.id).await.unwrap();
    let second = service.get_ingest_manifest(&second.id).await.unwrap();
    assert!(first.statistics.is_finished());
    assert_eq!(second.statistics.pending_files_count, 2);
    assert_eq!(second.statistics.finished_files_count, 0);
    assert!(!second.statistics.is_finished());
}
