//! Media service client interface
//!
//! [`MediaService`] is the single seam between the ingest core and the remote
//! media-processing service. One handle is built at startup and passed
//! explicitly to every component as `Arc<dyn MediaService>`.
//!
//! Two implementations ship with the crate:
//!
//! - [`rest::RestMediaService`] talks to the service over HTTP
//! - [`memory::InMemoryMediaService`] keeps everything in process, for tests
//!   and dry runs

use async_trait::async_trait;
use bulk_ingest_common::types::{
    AccessPermissions, AccessPolicy, Asset, AssetFile, IngestManifest, Locator, LocatorKind,
};
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;

pub mod endpoints;
pub mod memory;
pub mod rest;

pub use memory::InMemoryMediaService;
pub use rest::RestMediaService;

/// Parameters for minting a locator
#[derive(Debug, Clone)]
pub struct LocatorRequest<'a> {
    pub kind: LocatorKind,
    pub asset_id: &'a str,
    pub policy_id: &'a str,

    /// Start of the validity window; the service uses "now" when unset.
    /// Back-date it slightly, a locator that starts in the future is
    /// rejected on first use.
    pub start_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait MediaService: Send + Sync {
    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    async fn create_asset(&self, name: &str) -> Result<Asset>;

    /// Persist `name` and `alternate_id`
    async fn update_asset(&self, asset: &Asset) -> Result<()>;

    // ------------------------------------------------------------------
    // Asset files
    // ------------------------------------------------------------------

    /// Register a placeholder file; names are unique within an asset
    async fn create_asset_file(&self, asset_id: &str, name: &str) -> Result<AssetFile>;

    /// Persist size, checksum and the primary flag
    async fn update_asset_file(&self, file: &AssetFile) -> Result<()>;

    async fn list_asset_files(&self, asset_id: &str) -> Result<Vec<AssetFile>>;

    /// Stage one block of a file's content through a write locator
    async fn upload_block(
        &self,
        locator: &Locator,
        file_name: &str,
        block_id: &str,
        data: Vec<u8>,
    ) -> Result<()>;

    /// Commit staged blocks, in order, as the file's content
    async fn commit_blocks(&self, locator: &Locator, file_name: &str, block_ids: &[String])
        -> Result<()>;

    // ------------------------------------------------------------------
    // Access policies and locators
    // ------------------------------------------------------------------

    async fn list_access_policies(&self) -> Result<Vec<AccessPolicy>>;

    async fn create_access_policy(
        &self,
        name: &str,
        duration: Duration,
        permissions: AccessPermissions,
    ) -> Result<AccessPolicy>;

    async fn delete_access_policy(&self, policy_id: &str) -> Result<()>;

    async fn create_locator(&self, request: LocatorRequest<'_>) -> Result<Locator>;

    async fn delete_locator(&self, locator_id: &str) -> Result<()>;

    // ------------------------------------------------------------------
    // Ingest manifests
    // ------------------------------------------------------------------

    async fn create_ingest_manifest(&self, name: &str) -> Result<IngestManifest>;

    /// Declare file names an external actor will upload into `asset_id`
    async fn register_manifest_files(
        &self,
        manifest_id: &str,
        asset_id: &str,
        file_names: &[String],
    ) -> Result<()>;

    /// Fetch the manifest with fresh statistics
    async fn get_ingest_manifest(&self, manifest_id: &str) -> Result<IngestManifest>;

    async fn delete_ingest_manifest(&self, manifest_id: &str) -> Result<()>;
}
