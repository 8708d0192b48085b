//! Direct upload engine
//!
//! Pushes local files into an asset through a temporary write locator.
//! Two dials bound the work: `concurrent_transfers` files run at once, and
//! each file keeps at most `parallel_transfer_threads` blocks in flight.
//! Worst case that is `concurrent_transfers * parallel_transfer_threads`
//! outstanding block requests.
//!
//! Every file runs to completion or failure before the batch result is
//! decided, so a failed batch reports all failing files together.
//!
//! Progress is reported as blocks are acknowledged by the store, so its
//! granularity is one block: a file of `n` blocks produces at most `n`
//! increasing events before the final 100%. Lower `block_size_bytes` for
//! finer reporting.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bulk_ingest_common::checksum::ContentHasher;
use bulk_ingest_common::types::{
    AccessPermissions, AccessPolicy, Asset, AssetFile, Locator, LocatorKind,
};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::IngestConfig;
use crate::error::{FileFailure, IngestError, Result};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::service::{LocatorRequest, MediaService};
use crate::source::SourceFile;

/// Block id for the `index`th block of a file.
///
/// Ids are base64 of a fixed-width string so every id of a blob has the
/// same length.
pub fn block_id(index: usize) -> String {
    STANDARD.encode(format!("block-{index:06}"))
}

/// A short-lived write policy plus the SAS locator minted from it
pub struct WriteAccess {
    pub policy: AccessPolicy,
    pub locator: Locator,
}

impl WriteAccess {
    /// Create a write+list policy named after the asset and a SAS locator
    /// whose start is back-dated by `start_skew`.
    pub async fn acquire(
        service: &dyn MediaService,
        asset: &Asset,
        duration: chrono::Duration,
        start_skew: chrono::Duration,
    ) -> Result<Self> {
        let policy = service
            .create_access_policy(
                &format!("{} policy", asset.name),
                duration,
                AccessPermissions::WRITE | AccessPermissions::LIST,
            )
            .await?;

        let locator = service
            .create_locator(LocatorRequest {
                kind: LocatorKind::Sas,
                asset_id: &asset.id,
                policy_id: &policy.id,
                start_time: Some(Utc::now() - start_skew),
            })
            .await;

        match locator {
            Ok(locator) => Ok(Self { policy, locator }),
            Err(e) => {
                if let Err(cleanup) = service.delete_access_policy(&policy.id).await {
                    warn!(policy_id = %policy.id, error = %cleanup, "Failed to delete write policy");
                }
                Err(e)
            }
        }
    }

    /// Revoke the locator and delete the policy. Failures are logged only;
    /// both expire on their own.
    pub async fn release(self, service: &dyn MediaService) {
        if let Err(e) = service.delete_locator(&self.locator.id).await {
            warn!(locator_id = %self.locator.id, error = %e, "Failed to revoke write locator");
        }
        if let Err(e) = service.delete_access_policy(&self.policy.id).await {
            warn!(policy_id = %self.policy.id, error = %e, "Failed to delete write policy");
        }
    }
}

/// Upload an in-memory buffer as `file_name`, one block at a time
pub async fn upload_bytes(
    service: &dyn MediaService,
    locator: &Locator,
    file_name: &str,
    data: &[u8],
    block_size: usize,
) -> Result<()> {
    let mut block_ids = Vec::new();
    for (index, chunk) in data.chunks(block_size.max(1)).enumerate() {
        let id = block_id(index);
        service
            .upload_block(locator, file_name, &id, chunk.to_vec())
            .await?;
        block_ids.push(id);
    }
    service.commit_blocks(locator, file_name, &block_ids).await
}

/// Result of a successful direct upload batch
#[derive(Debug, Clone)]
pub struct DirectUploadReport {
    /// Uploaded files, sorted by name
    pub files: Vec<AssetFile>,
    pub total_bytes: u64,
}

pub struct DirectUploader {
    service: Arc<dyn MediaService>,
    config: IngestConfig,
}

impl DirectUploader {
    pub fn new(service: Arc<dyn MediaService>, config: IngestConfig) -> Self {
        Self { service, config }
    }

    /// Acquire write access for the asset, register every source as an asset
    /// file, then upload them all.
    ///
    /// Placeholders are registered one at a time, in name order, before any
    /// byte moves. The write policy and locator are released whatever the
    /// outcome. On failure the asset keeps whatever was registered; there is
    /// no rollback.
    #[instrument(skip_all, fields(asset_id = %asset.id, files = sources.len()))]
    pub async fn upload_directory(
        &self,
        asset: &Asset,
        sources: &[SourceFile],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DirectUploadReport> {
        let access = WriteAccess::acquire(
            self.service.as_ref(),
            asset,
            self.config.upload_policy_duration(),
            self.config.locator_start_skew(),
        )
        .await?;

        let result = match self.register_all(asset, sources, cancel).await {
            Ok(placeholders) => {
                info!(
                    concurrent_transfers = self.config.concurrent_transfers,
                    parallel_transfer_threads = self.config.parallel_transfer_threads,
                    "Starting direct upload"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(IngestError::Cancelled),
                    result = self.transfer_all(&access.locator, sources, placeholders, progress) => result,
                }
            }
            Err(e) => Err(e),
        };

        access.release(self.service.as_ref()).await;
        result
    }

    async fn register_all(
        &self,
        asset: &Asset,
        sources: &[SourceFile],
        cancel: &CancellationToken,
    ) -> Result<Vec<AssetFile>> {
        let mut placeholders = Vec::with_capacity(sources.len());
        for source in sources {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            let file = self
                .service
                .create_asset_file(&asset.id, &source.name)
                .await?;
            debug!(file = %file.name, file_id = %file.id, "Registered asset file");
            placeholders.push(file);
        }
        Ok(placeholders)
    }

    async fn transfer_all(
        &self,
        locator: &Locator,
        sources: &[SourceFile],
        placeholders: Vec<AssetFile>,
        progress: &dyn ProgressSink,
    ) -> Result<DirectUploadReport> {
        let total = sources.len();

        let results: Vec<(String, Result<AssetFile>)> = stream::iter(sources.iter().zip(placeholders))
            .map(|(source, file)| async move {
                let result = self.transfer_file(locator, source, file, progress).await;
                (source.name.clone(), result)
            })
            .buffer_unordered(self.config.concurrent_transfers.max(1))
            .collect()
            .await;

        let mut files = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(file) => files.push(file),
                Err(e) => {
                    error!(file = %name, error = %e, "Upload failed");
                    failures.push(FileFailure {
                        file: name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            failures.sort_by(|a, b| a.file.cmp(&b.file));
            return Err(IngestError::BatchUpload { failures, total });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        let total_bytes = files.iter().map(|f| f.content_file_size).sum();
        Ok(DirectUploadReport { files, total_bytes })
    }

    /// Stream one file as blocks, commit them in order and record the
    /// checksum and size on the asset file.
    #[instrument(skip_all, fields(file = %source.name, size = source.size))]
    async fn transfer_file(
        &self,
        locator: &Locator,
        source: &SourceFile,
        mut file: AssetFile,
        progress: &dyn ProgressSink,
    ) -> Result<AssetFile> {
        let initial = ProgressEvent::new(&source.name, 0, source.size);
        progress.report(&initial);

        let reader = tokio::fs::File::open(&source.path).await?;
        let block_size = self.config.block_size_bytes.max(1);

        let hasher = Mutex::new(ContentHasher::new());
        let sent = AtomicU64::new(0);
        let reported = AtomicU8::new(initial.percentage);
        let (hasher_ref, sent_ref, reported_ref) = (&hasher, &sent, &reported);

        // Blocks are read and hashed sequentially; only the uploads overlap.
        let blocks = stream::try_unfold((reader, 0usize), move |(mut reader, index)| async move {
            let mut buf = Vec::with_capacity(block_size);
            (&mut reader)
                .take(block_size as u64)
                .read_to_end(&mut buf)
                .await?;
            if buf.is_empty() {
                return Ok(None);
            }
            hasher_ref
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update(&buf);
            Ok::<_, IngestError>(Some(((index, buf), (reader, index + 1))))
        });

        let mut uploaded: Vec<(usize, String)> = blocks
            .map_ok(|(index, data)| async move {
                let id = block_id(index);
                let len = data.len() as u64;
                self.service
                    .upload_block(locator, &source.name, &id, data)
                    .await?;

                let done = sent_ref.fetch_add(len, Ordering::SeqCst) + len;
                let event = ProgressEvent::new(&source.name, done, source.size.max(done));
                if reported_ref.fetch_max(event.percentage, Ordering::SeqCst) < event.percentage {
                    progress.report(&event);
                }
                Ok::<_, IngestError>((index, id))
            })
            .try_buffer_unordered(self.config.parallel_transfer_threads.max(1))
            .try_collect()
            .await?;

        uploaded.sort_by_key(|(index, _)| *index);
        let block_ids: Vec<String> = uploaded.into_iter().map(|(_, id)| id).collect();
        self.service
            .commit_blocks(locator, &source.name, &block_ids)
            .await?;

        let hasher = hasher.into_inner().unwrap_or_else(PoisonError::into_inner);
        let bytes = hasher.bytes();
        if reported.load(Ordering::SeqCst) < 100 {
            progress.report(&ProgressEvent::new(&source.name, bytes, bytes));
        }

        file.content_file_size = bytes;
        file.checksum = Some(hasher.finalize());
        self.service.update_asset_file(&file).await?;

        debug!(blocks = block_ids.len(), bytes, "File committed");
        Ok(file)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::service::InMemoryMediaService;
    use crate::source::scan_directory;
    use bulk_ingest_common::checksum::sha256_hex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn report(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn small_blocks() -> IngestConfig {
        IngestConfig {
            block_size_bytes: 4,
            ..IngestConfig::default()
        }
    }

    #[test]
    fn test_block_ids_have_equal_length() {
        assert_eq!(block_id(0).len(), block_id(999_999).len());
        assert_ne!(block_id(1), block_id(2));
    }

    #[tokio::test]
    async fn test_upload_directory_commits_content_and_checksums() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"0123456789").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"xyz").unwrap();
        let sources = scan_directory(dir.path()).await.unwrap();

        let service = Arc::new(InMemoryMediaService::new());
        let asset = service.create_asset("clips").await.unwrap();
        let uploader = DirectUploader::new(service.clone(), small_blocks());
        let recorder = Recorder::default();

        let report = uploader
            .upload_directory(&asset, &sources, &recorder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.total_bytes, 13);
        assert_eq!(report.files[0].checksum.as_deref(), Some(sha256_hex(b"0123456789").as_str()));
        assert!(report.files.iter().all(AssetFile::is_uploaded));
        assert_eq!(service.file_content(&asset.id, "a.mp4").unwrap(), b"0123456789");

        let events = recorder.0.lock().unwrap();
        for name in ["a.mp4", "b.mp4"] {
            let last = events.iter().filter(|e| e.source_name == name).last().unwrap();
            assert_eq!(last.percentage, 100);
        }

        // write policy and locator are gone after the batch
        assert!(service.locators().is_empty());
        assert!(service.list_access_policies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_advances_once_per_block() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"0123456789").unwrap();
        let sources = scan_directory(dir.path()).await.unwrap();

        let service = Arc::new(InMemoryMediaService::new());
        let asset = service.create_asset("clips").await.unwrap();
        let uploader = DirectUploader::new(service.clone(), small_blocks());
        let recorder = Recorder::default();

        uploader
            .upload_directory(&asset, &sources, &recorder, &CancellationToken::new())
            .await
            .unwrap();

        // 10 bytes in blocks of 4: the initial event plus one per block
        let percents: Vec<u8> = recorder.0.lock().unwrap().iter().map(|e| e.percentage).collect();
        assert_eq!(percents.len(), 4);
        assert_eq!(percents[0], 0);
        assert_eq!(percents[3], 100);
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_zero_byte_file_reports_completion_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        std::fs::write(&path, b"").unwrap();
        let sources = vec![SourceFile {
            name: "empty.mp4".to_string(),
            path,
            size: 0,
        }];

        let service = Arc::new(InMemoryMediaService::new());
        let asset = service.create_asset("clips").await.unwrap();
        let uploader = DirectUploader::new(service.clone(), small_blocks());
        let recorder = Recorder::default();

        uploader
            .upload_directory(&asset, &sources, &recorder, &CancellationToken::new())
            .await
            .unwrap();

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].percentage, 100);
    }

    #[tokio::test]
    async fn test_registration_failure_releases_write_access() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"data").unwrap();
        let sources = scan_directory(dir.path()).await.unwrap();

        let service = Arc::new(InMemoryMediaService::new());
        let asset = service.create_asset("clips").await.unwrap();
        service.create_asset_file(&asset.id, "a.mp4").await.unwrap();
        let uploader = DirectUploader::new(service.clone(), small_blocks());

        let err = uploader
            .upload_directory(&asset, &sources, &crate::progress::NullProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Rejected(_)));
        assert!(service.locators().is_empty());
        assert!(service.list_access_policies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_reports_every_failed_file() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mp4", "b.mp4", "c.mp4"] {
            std::fs::write(dir.path().join(name), b"data").unwrap();
        }
        let sources = scan_directory(dir.path()).await.unwrap();

        let service = Arc::new(InMemoryMediaService::new());
        service.fail_uploads_for("a.mp4");
        service.fail_uploads_for("c.mp4");
        let asset = service.create_asset("clips").await.unwrap();
        let uploader = DirectUploader::new(service.clone(), small_blocks());

        let err = uploader
            .upload_directory(&asset, &sources, &crate::progress::NullProgress, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            IngestError::BatchUpload { failures, total } => {
                assert_eq!(total, 3);
                let names: Vec<_> = failures.iter().map(|f| f.file.as_str()).collect();
                assert_eq!(names, ["a.mp4", "c.mp4"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(service.locators().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"data").unwrap();
        let sources = scan_directory(dir.path()).await.unwrap();

        let service = Arc::new(InMemoryMediaService::new());
        let asset = service.create_asset("clips").await.unwrap();
        let uploader = DirectUploader::new(service.clone(), small_blocks());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = uploader
            .upload_directory(&asset, &sources, &crate::progress::NullProgress, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
        assert!(service.list_asset_files(&asset.id).await.unwrap().is_empty());
        assert!(service.locators().is_empty());
    }
}
