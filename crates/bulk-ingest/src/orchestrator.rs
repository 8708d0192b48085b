//! Ingest orchestration
//!
//! One run takes a watch folder to a streamable asset:
//!
//! 1. scan the folder
//! 2. create the asset and stamp it with a correlation id
//! 3. move the bytes, either directly or through an external manifest
//! 4. publish the `.ism` manifest
//! 5. mint the origin locator and playback URLs
//!
//! Any failure ends the run. Nothing is rolled back; the correlation id in
//! the logs identifies the partial asset.

use bulk_ingest_common::types::{Asset, AssetFile};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::external::ExternalCoordinator;
use crate::manifest::ManifestPublisher;
use crate::progress::{format_bytes, ProgressSink, ProgressTracker};
use crate::publish::{Publication, PublicationFinalizer};
use crate::service::MediaService;
use crate::source::scan_directory;
use crate::upload::DirectUploader;

/// How file content reaches the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// This process uploads every file itself
    Direct,
    /// Files are declared in an ingest manifest and uploaded by someone else
    External,
}

impl FromStr for IngestMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "d" | "direct" => Ok(IngestMode::Direct),
            "e" | "external" => Ok(IngestMode::External),
            _ => Err(IngestError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestMode::Direct => write!(f, "direct"),
            IngestMode::External => write!(f, "external"),
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub correlation_id: Uuid,
    pub mode: IngestMode,
    pub asset: Asset,
    /// Every file of the asset after publication, manifest included
    pub files: Vec<AssetFile>,
    pub manifest_file: AssetFile,
    pub publication: Publication,
}

pub struct Ingestor {
    service: Arc<dyn MediaService>,
    config: IngestConfig,
    progress_bars: bool,
}

impl Ingestor {
    pub fn new(service: Arc<dyn MediaService>, config: IngestConfig) -> Self {
        Self {
            service,
            config,
            progress_bars: false,
        }
    }

    /// Draw per-file progress bars during direct uploads
    pub fn with_progress_bars(mut self, enabled: bool) -> Self {
        self.progress_bars = enabled;
        self
    }

    #[instrument(skip(self, source, cancel), fields(source = %source.display()))]
    pub async fn run(
        &self,
        source: &Path,
        mode: IngestMode,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        let sources = scan_directory(source).await?;

        let folder_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("ingest")
            .to_string();
        let mut asset = self.service.create_asset(&folder_name).await?;

        let correlation_id = Uuid::new_v4();
        asset.alternate_id = Some(format!("ingest-id-{correlation_id}"));
        asset.name = format!("ingest-{correlation_id}");
        self.service.update_asset(&asset).await?;
        info!(
            asset_id = %asset.id,
            %correlation_id,
            %mode,
            files = sources.len(),
            "Created asset"
        );

        match mode {
            IngestMode::Direct => {
                let tracker = ProgressTracker::new(sources.len());
                let tracker = if self.progress_bars { tracker.with_bars() } else { tracker };

                let uploader = DirectUploader::new(self.service.clone(), self.config.clone());
                let result = uploader
                    .upload_directory(&asset, &sources, &tracker as &dyn ProgressSink, cancel)
                    .await;
                tracker.finish();

                let report = result?;
                info!(
                    summary = %tracker.summary(),
                    size = %format_bytes(report.total_bytes),
                    "Direct upload complete"
                );
            }
            IngestMode::External => {
                let names: Vec<String> = sources.iter().map(|s| s.name.clone()).collect();
                let coordinator = ExternalCoordinator::new(self.service.clone(), self.config.poll_interval())
                    .with_timeout(self.config.poll_timeout());
                let report = coordinator
                    .run(&asset, &format!("ingest-{correlation_id}"), &names, cancel)
                    .await?;
                coordinator.confirm_delivery(&asset, &sources).await?;
                info!(manifest_id = %report.manifest_id, polls = report.polls, "External upload complete");
            }
        }

        let files = self.service.list_asset_files(&asset.id).await?;
        let publisher = ManifestPublisher::new(self.service.clone(), self.config.clone());
        let manifest_file = publisher.publish(&asset, &files).await?;

        let files = self.service.list_asset_files(&asset.id).await?;
        let finalizer = PublicationFinalizer::new(self.service.clone(), self.config.clone());
        let publication = finalizer.publish(&asset, &manifest_file, &files).await?;

        Ok(IngestOutcome {
            correlation_id,
            mode,
            asset,
            files,
            manifest_file,
            publication,
        })
    }
}
