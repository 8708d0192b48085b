//! External manifest coordinator
//!
//! Declares the files an out-of-band actor will upload, then polls the
//! manifest until nothing is pending. Polls are strictly sequential: one
//! request, one sleep, repeat.

use bulk_ingest_common::types::{Asset, AssetFile, ManifestStatistics};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{IngestError, Result};
use crate::service::MediaService;
use crate::source::SourceFile;

/// Where a coordinator run is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Created,
    Polling,
    Finished,
}

#[derive(Debug, Clone)]
pub struct ExternalUploadReport {
    pub manifest_id: String,
    /// Polls made, including the one that saw completion
    pub polls: u32,
    pub statistics: ManifestStatistics,
    pub state: CoordinatorState,
}

pub struct ExternalCoordinator {
    service: Arc<dyn MediaService>,
    poll_interval: Duration,
    poll_timeout: Option<Duration>,
}

impl ExternalCoordinator {
    pub fn new(service: Arc<dyn MediaService>, poll_interval: Duration) -> Self {
        Self {
            service,
            poll_interval,
            poll_timeout: None,
        }
    }

    /// Give up with [`IngestError::PollTimeout`] after `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Create the manifest, register `file_names` against `asset` and wait
    /// for the external actor to finish.
    ///
    /// The manifest is deleted once finished. On timeout or cancellation it
    /// is left in place so the operator can inspect it.
    #[instrument(skip(self, asset, file_names, cancel), fields(asset_id = %asset.id, files = file_names.len()))]
    pub async fn run(
        &self,
        asset: &Asset,
        manifest_name: &str,
        file_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExternalUploadReport> {
        let manifest = self.service.create_ingest_manifest(manifest_name).await?;
        self.service
            .register_manifest_files(&manifest.id, &asset.id, file_names)
            .await?;

        let mut report = ExternalUploadReport {
            manifest_id: manifest.id.clone(),
            polls: 0,
            statistics: manifest.statistics,
            state: CoordinatorState::Created,
        };

        if let Some(uri) = &manifest.blob_storage_uri_for_upload {
            info!(manifest_id = %manifest.id, upload_uri = %uri, "Waiting for external upload");
        } else {
            info!(manifest_id = %manifest.id, "Waiting for external upload");
        }

        let started = Instant::now();
        report.state = CoordinatorState::Polling;

        loop {
            let current = self.service.get_ingest_manifest(&manifest.id).await?;
            report.polls += 1;
            report.statistics = current.statistics;

            let stats = current.statistics;
            info!(
                pending = stats.pending_files_count,
                finished = stats.finished_files_count,
                "Pending files: {}, finished files: {}, {:.2}% complete",
                stats.pending_files_count,
                stats.finished_files_count,
                stats.percent_complete()
            );

            if stats.is_finished() {
                report.state = CoordinatorState::Finished;
                break;
            }

            if let Some(timeout) = self.poll_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    warn!(manifest_id = %manifest.id, "Leaving ingest manifest in place after timeout");
                    return Err(IngestError::PollTimeout {
                        manifest_id: manifest.id,
                        pending: stats.pending_files_count,
                        waited,
                    });
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(manifest_id = %manifest.id, "Cancelled while polling; ingest manifest left in place");
                    return Err(IngestError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        if let Err(e) = self.service.delete_ingest_manifest(&manifest.id).await {
            warn!(manifest_id = %manifest.id, error = %e, "Failed to delete ingest manifest");
        }

        Ok(report)
    }

    /// Record the local size of every delivered file the service still lists
    /// without content, and return the asset's files.
    ///
    /// A finished manifest vouches for every registered file, but the service
    /// may report content sizes later than the manifest statistics.
    #[instrument(skip_all, fields(asset_id = %asset.id))]
    pub async fn confirm_delivery(
        &self,
        asset: &Asset,
        sources: &[SourceFile],
    ) -> Result<Vec<AssetFile>> {
        let mut files = self.service.list_asset_files(&asset.id).await?;

        for file in files.iter_mut().filter(|f| !f.is_uploaded()) {
            let Some(source) = sources.iter().find(|s| s.name == file.name) else {
                continue;
            };
            file.content_file_size = source.size;
            self.service.update_asset_file(file).await?;
            debug!(file = %file.name, size = source.size, "Recorded size of delivered file");
        }

        Ok(files)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::service::InMemoryMediaService;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn source(name: &str, size: u64) -> SourceFile {
        SourceFile {
            name: name.to_string(),
            path: std::path::PathBuf::from(name),
            size,
        }
    }

    #[tokio::test]
    async fn test_confirm_delivery_fills_missing_sizes() {
        let service = Arc::new(InMemoryMediaService::new());
        let asset = service.create_asset("clips").await.unwrap();
        let manifest = service.create_ingest_manifest("ingest-1").await.unwrap();
        service
            .register_manifest_files(&manifest.id, &asset.id, &names(&["a.mp4", "b.mp4"]))
            .await
            .unwrap();
        service.finish_manifest_file(&manifest.id, "b.mp4").unwrap();
        let delivered = service.list_asset_files(&asset.id).await.unwrap()[1].content_file_size;

        let coordinator = ExternalCoordinator::new(service.clone(), Duration::from_secs(5));
        let files = coordinator
            .confirm_delivery(&asset, &[source("a.mp4", 5), source("b.mp4", 7)])
            .await
            .unwrap();

        assert!(files.iter().all(AssetFile::is_uploaded));
        let listed = service.list_asset_files(&asset.id).await.unwrap();
        assert_eq!(listed[0].content_file_size, 5);
        // a size the service already reports is left alone
        assert_eq!(listed[1].content_file_size, delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_nothing_pending() {
        let service = Arc::new(InMemoryMediaService::new());
        service.complete_external_uploads_after(3);
        let asset = service.create_asset("clips").await.unwrap();
        let coordinator = ExternalCoordinator::new(service.clone(), Duration::from_secs(5));

        let started = Instant::now();
        let report = coordinator
            .run(&asset, "ingest-1", &names(&["a.mp4", "b.mp4"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.polls, 3);
        assert_eq!(report.state, CoordinatorState::Finished);
        assert_eq!(report.statistics, ManifestStatistics::new(0, 2));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert!(!service.manifest_exists(&report.manifest_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_registration_finishes_on_first_poll() {
        let service = Arc::new(InMemoryMediaService::new());
        let asset = service.create_asset("clips").await.unwrap();
        let coordinator = ExternalCoordinator::new(service.clone(), Duration::from_secs(5));

        let report = coordinator
            .run(&asset, "ingest-1", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.polls, 1);
        assert_eq!(report.statistics.percent_complete(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_manifest() {
        let service = Arc::new(InMemoryMediaService::new());
        let asset = service.create_asset("clips").await.unwrap();
        let coordinator = ExternalCoordinator::new(service.clone(), Duration::from_secs(5))
            .with_timeout(Some(Duration::from_secs(12)));

        let err = coordinator
            .run(&asset, "ingest-1", &names(&["a.mp4"]), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            IngestError::PollTimeout {
                manifest_id,
                pending,
                waited,
            } => {
                assert_eq!(pending, 1);
                assert_eq!(waited, Duration::from_secs(15));
                assert!(service.manifest_exists(&manifest_id));
                assert_eq!(service.manifest_poll_count(&manifest_id), Some(4));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let service = Arc::new(InMemoryMediaService::new());
        let asset = service.create_asset("clips").await.unwrap();
        let coordinator = ExternalCoordinator::new(service.clone(), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let err = coordinator
            .run(&asset, "ingest-1", &names(&["a.mp4"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
        assert_eq!(service.manifest_names(), ["ingest-1"]);
    }
}
