//! In-process media service
//!
//! Keeps assets, files, policies, locators and ingest manifests in memory and
//! enforces the same rules the remote service does: unique file names per
//! asset, write permission for uploads, read permission for origin locators,
//! checksums matching committed content. Used by tests and `--dry-run`.
//!
//! External uploads never happen on their own here. Tests drive them with
//! [`InMemoryMediaService::finish_manifest_file`] or let the service finish
//! everything after a number of polls with
//! [`InMemoryMediaService::complete_external_uploads_after`].

use async_trait::async_trait;
use bulk_ingest_common::checksum::{sha256_hex, verify_checksum};
use bulk_ingest_common::types::{
    AccessPermissions, AccessPolicy, Asset, AssetFile, IngestManifest, Locator, LocatorKind,
    ManifestStatistics,
};
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::{LocatorRequest, MediaService};
use crate::error::{IngestError, Result};

const STORAGE_HOST: &str = "https://storage.media.local";
const ORIGIN_HOST: &str = "https://origin.media.local";

struct StoredFile {
    file: AssetFile,
    staged: HashMap<String, Vec<u8>>,
    content: Vec<u8>,
}

struct ManifestFile {
    asset_id: String,
    name: String,
    finished: bool,
}

struct StoredManifest {
    id: String,
    name: String,
    files: Vec<ManifestFile>,
    polls: u32,
}

impl StoredManifest {
    fn statistics(&self) -> ManifestStatistics {
        let finished = self.files.iter().filter(|f| f.finished).count() as u32;
        ManifestStatistics::new(self.files.len() as u32 - finished, finished)
    }

    fn to_manifest(&self) -> IngestManifest {
        IngestManifest {
            id: self.id.clone(),
            name: self.name.clone(),
            blob_storage_uri_for_upload: Url::parse(&format!("{STORAGE_HOST}/{}", self.id)).ok(),
            statistics: self.statistics(),
        }
    }
}

#[derive(Default)]
struct State {
    assets: BTreeMap<String, Asset>,
    files: BTreeMap<String, StoredFile>,
    policies: BTreeMap<String, AccessPolicy>,
    locators: BTreeMap<String, Locator>,
    manifests: BTreeMap<String, StoredManifest>,
    complete_after_polls: Option<u32>,
    failing_uploads: HashSet<String>,
}

impl State {
    fn file_by_name_mut(&mut self, asset_id: &str, name: &str) -> Option<&mut StoredFile> {
        self.files
            .values_mut()
            .find(|f| f.file.asset_id == asset_id && f.file.name == name)
    }

    fn add_file(&mut self, asset_id: &str, name: &str) -> AssetFile {
        let file = AssetFile {
            id: new_id("nb:cid:UUID"),
            asset_id: asset_id.to_string(),
            name: name.to_string(),
            content_file_size: 0,
            is_primary: false,
            checksum: None,
        };
        self.files.insert(
            file.id.clone(),
            StoredFile {
                file: file.clone(),
                staged: HashMap::new(),
                content: Vec::new(),
            },
        );
        file
    }

    /// Mark a manifest entry finished and deliver content to its asset file,
    /// recording the size the way the service does after an external upload
    fn finish_entry(&mut self, manifest_id: &str, index: usize) {
        let Some(manifest) = self.manifests.get_mut(manifest_id) else {
            return;
        };
        let Some(entry) = manifest.files.get_mut(index) else {
            return;
        };
        entry.finished = true;
        let (asset_id, name) = (entry.asset_id.clone(), entry.name.clone());

        if let Some(stored) = self.file_by_name_mut(&asset_id, &name) {
            stored.content = format!("delivered externally: {name}").into_bytes();
            stored.file.content_file_size = stored.content.len() as u64;
        }
    }

    /// Check that `locator` may be used to write `file_name` right now
    fn writable_file(&mut self, locator: &Locator, file_name: &str) -> Result<&mut StoredFile> {
        let known = self
            .locators
            .get(&locator.id)
            .ok_or_else(|| IngestError::not_found("Locator", &locator.id))?;

        if known.kind != LocatorKind::Sas {
            return Err(IngestError::rejected("uploads require a SAS locator"));
        }
        if !known.is_active_at(Utc::now()) {
            return Err(IngestError::rejected(format!("locator '{}' is not active", known.id)));
        }

        let policy = self
            .policies
            .get(&known.access_policy_id)
            .ok_or_else(|| IngestError::not_found("AccessPolicy", &known.access_policy_id))?;
        if !policy.permissions.contains(AccessPermissions::WRITE) {
            return Err(IngestError::rejected(format!(
                "policy '{}' does not grant write access",
                policy.name
            )));
        }

        let asset_id = known.asset_id.clone();
        self.file_by_name_mut(&asset_id, file_name)
            .ok_or_else(|| IngestError::not_found("AssetFile", file_name))
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}:{}", Uuid::new_v4())
}

/// Media service that lives entirely in memory
#[derive(Default)]
pub struct InMemoryMediaService {
    state: Mutex<State>,
}

impl InMemoryMediaService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finish every registered file of a manifest once it has been polled
    /// `polls` times.
    pub fn complete_external_uploads_after(&self, polls: u32) {
        self.state().complete_after_polls = Some(polls);
    }

    /// Simulate the external actor finishing one file
    pub fn finish_manifest_file(&self, manifest_id: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        let index = state
            .manifests
            .get(manifest_id)
            .ok_or_else(|| IngestError::not_found("IngestManifest", manifest_id))?
            .files
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| IngestError::not_found("IngestManifestFile", name))?;
        state.finish_entry(manifest_id, index);
        Ok(())
    }

    /// Make every block upload for files called `name` fail
    pub fn fail_uploads_for(&self, name: &str) {
        self.state().failing_uploads.insert(name.to_string());
    }

    /// Committed content of a file
    pub fn file_content(&self, asset_id: &str, name: &str) -> Option<Vec<u8>> {
        self.state()
            .file_by_name_mut(asset_id, name)
            .map(|f| f.content.clone())
    }

    pub fn manifest_exists(&self, manifest_id: &str) -> bool {
        self.state().manifests.contains_key(manifest_id)
    }

    pub fn manifest_poll_count(&self, manifest_id: &str) -> Option<u32> {
        self.state().manifests.get(manifest_id).map(|m| m.polls)
    }

    /// Manifests still held by the service, by name
    pub fn manifest_names(&self) -> Vec<String> {
        self.state().manifests.values().map(|m| m.name.clone()).collect()
    }

    pub fn locators(&self) -> Vec<Locator> {
        self.state().locators.values().cloned().collect()
    }

    pub fn asset(&self, asset_id: &str) -> Option<Asset> {
        self.state().assets.get(asset_id).cloned()
    }
}

#[async_trait]
impl MediaService for InMemoryMediaService {
    async fn create_asset(&self, name: &str) -> Result<Asset> {
        let asset = Asset {
            id: new_id("nb:cid:UUID"),
            name: name.to_string(),
            alternate_id: None,
            created: Utc::now(),
        };
        self.state().assets.insert(asset.id.clone(), asset.clone());
        debug!(asset_id = %asset.id, "Created asset");
        Ok(asset)
    }

    async fn update_asset(&self, asset: &Asset) -> Result<()> {
        let mut state = self.state();
        let stored = state
            .assets
            .get_mut(&asset.id)
            .ok_or_else(|| IngestError::not_found("Asset", &asset.id))?;
        stored.name = asset.name.clone();
        stored.alternate_id = asset.alternate_id.clone();
        Ok(())
    }

    async fn create_asset_file(&self, asset_id: &str, name: &str) -> Result<AssetFile> {
        let mut state = self.state();
        if !state.assets.contains_key(asset_id) {
            return Err(IngestError::not_found("Asset", asset_id));
        }
        if state.file_by_name_mut(asset_id, name).is_some() {
            return Err(IngestError::rejected(format!(
                "asset '{asset_id}' already has a file named '{name}'"
            )));
        }
        Ok(state.add_file(asset_id, name))
    }

    async fn update_asset_file(&self, file: &AssetFile) -> Result<()> {
        let mut state = self.state();
        let stored = state
            .files
            .get_mut(&file.id)
            .ok_or_else(|| IngestError::not_found("AssetFile", &file.id))?;

        if let Some(expected) = &file.checksum {
            verify_checksum(&stored.content, expected)?;
            if file.content_file_size != stored.content.len() as u64 {
                return Err(IngestError::rejected(format!(
                    "size {} does not match committed content of '{}' ({} bytes)",
                    file.content_file_size,
                    file.name,
                    stored.content.len()
                )));
            }
        }

        stored.file = AssetFile {
            id: stored.file.id.clone(),
            asset_id: stored.file.asset_id.clone(),
            ..file.clone()
        };
        Ok(())
    }

    async fn list_asset_files(&self, asset_id: &str) -> Result<Vec<AssetFile>> {
        let state = self.state();
        if !state.assets.contains_key(asset_id) {
            return Err(IngestError::not_found("Asset", asset_id));
        }
        let mut files: Vec<AssetFile> = state
            .files
            .values()
            .filter(|f| f.file.asset_id == asset_id)
            .map(|f| f.file.clone())
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn upload_block(
        &self,
        locator: &Locator,
        file_name: &str,
        block_id: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut state = self.state();
        if state.failing_uploads.contains(file_name) {
            return Err(IngestError::Service {
                status: 503,
                message: format!("simulated upload failure for '{file_name}'"),
            });
        }

        let stored = state.writable_file(locator, file_name)?;
        stored.staged.insert(block_id.to_string(), data);
        Ok(())
    }

    async fn commit_blocks(
        &self,
        locator: &Locator,
        file_name: &str,
        block_ids: &[String],
    ) -> Result<()> {
        let mut state = self.state();
        let stored = state.writable_file(locator, file_name)?;

        let mut content = Vec::new();
        for id in block_ids {
            let block = stored.staged.get(id).ok_or_else(|| {
                IngestError::rejected(format!("block '{id}' of '{file_name}' was never staged"))
            })?;
            content.extend_from_slice(block);
        }

        debug!(file = file_name, bytes = content.len(), sha256 = %sha256_hex(&content), "Committed blocks");
        stored.content = content;
        stored.staged.clear();
        Ok(())
    }

    async fn list_access_policies(&self) -> Result<Vec<AccessPolicy>> {
        Ok(self.state().policies.values().cloned().collect())
    }

    async fn create_access_policy(
        &self,
        name: &str,
        duration: Duration,
        permissions: AccessPermissions,
    ) -> Result<AccessPolicy> {
        if duration <= Duration::zero() {
            return Err(IngestError::rejected("policy duration must be positive"));
        }
        let policy = AccessPolicy {
            id: new_id("nb:pid:UUID"),
            name: name.to_string(),
            duration_in_minutes: duration.num_seconds() as f64 / 60.0,
            permissions,
        };
        self.state().policies.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    async fn delete_access_policy(&self, policy_id: &str) -> Result<()> {
        self.state()
            .policies
            .remove(policy_id)
            .map(|_| ())
            .ok_or_else(|| IngestError::not_found("AccessPolicy", policy_id))
    }

    async fn create_locator(&self, request: LocatorRequest<'_>) -> Result<Locator> {
        let mut state = self.state();
        if !state.assets.contains_key(request.asset_id) {
            return Err(IngestError::not_found("Asset", request.asset_id));
        }
        let policy = state
            .policies
            .get(request.policy_id)
            .ok_or_else(|| IngestError::not_found("AccessPolicy", request.policy_id))?;

        if request.kind == LocatorKind::OnDemandOrigin
            && !policy.permissions.contains(AccessPermissions::READ)
        {
            return Err(IngestError::rejected("origin locators require a read policy"));
        }

        let token = Uuid::new_v4().simple().to_string();
        let path = match request.kind {
            LocatorKind::Sas => format!(
                "{STORAGE_HOST}/asset-{token}?sv=2017-04-17&sr=c&sp={}&sig=simulated",
                policy.permissions
            ),
            LocatorKind::OnDemandOrigin => format!("{ORIGIN_HOST}/{token}/"),
        };
        let path = Url::parse(&path).map_err(bulk_ingest_common::CommonError::from)?;

        let start = request.start_time.unwrap_or_else(Utc::now);
        let locator = Locator {
            id: new_id("nb:lid:UUID"),
            kind: request.kind,
            asset_id: request.asset_id.to_string(),
            access_policy_id: request.policy_id.to_string(),
            path,
            start_time: request.start_time,
            expiration_date_time: start + policy.duration(),
        };
        state.locators.insert(locator.id.clone(), locator.clone());
        Ok(locator)
    }

    async fn delete_locator(&self, locator_id: &str) -> Result<()> {
        self.state()
            .locators
            .remove(locator_id)
            .map(|_| ())
            .ok_or_else(|| IngestError::not_found("Locator", locator_id))
    }

    async fn create_ingest_manifest(&self, name: &str) -> Result<IngestManifest> {
        let manifest = StoredManifest {
            id: new_id("nb:mid:UUID"),
            name: name.to_string(),
            files: Vec::new(),
            polls: 0,
        };
        let view = manifest.to_manifest();
        self.state().manifests.insert(manifest.id.clone(), manifest);
        Ok(view)
    }

    async fn register_manifest_files(
        &self,
        manifest_id: &str,
        asset_id: &str,
        file_names: &[String],
    ) -> Result<()> {
        let mut state = self.state();
        if !state.assets.contains_key(asset_id) {
            return Err(IngestError::not_found("Asset", asset_id));
        }
        if !state.manifests.contains_key(manifest_id) {
            return Err(IngestError::not_found("IngestManifest", manifest_id));
        }

        for name in file_names {
            if state.file_by_name_mut(asset_id, name).is_none() {
                state.add_file(asset_id, name);
            }

            if let Some(manifest) = state.manifests.get_mut(manifest_id) {
                let known = manifest
                    .files
                    .iter()
                    .any(|f| f.asset_id == asset_id && &f.name == name);
                if !known {
                    manifest.files.push(ManifestFile {
                        asset_id: asset_id.to_string(),
                        name: name.clone(),
                        finished: false,
                    });
                }
            }
        }
        Ok(())
    }

    async fn get_ingest_manifest(&self, manifest_id: &str) -> Result<IngestManifest> {
        let mut state = self.state();
        let complete_after = state.complete_after_polls;

        let manifest = state
            .manifests
            .get_mut(manifest_id)
            .ok_or_else(|| IngestError::not_found("IngestManifest", manifest_id))?;
        manifest.polls += 1;
        let polls = manifest.polls;
        let entries = manifest.files.len();

        if complete_after.is_some_and(|n| polls >= n) {
            for index in 0..entries {
                state.finish_entry(manifest_id, index);
            }
        }

        state
            .manifests
            .get(manifest_id)
            .map(StoredManifest::to_manifest)
            .ok_or_else(|| IngestError::not_found("IngestManifest", manifest_id))
    }

    async fn delete_ingest_manifest(&self, manifest_id: &str) -> Result<()> {
        self.state()
            .manifests
            .remove(manifest_id)
            .map(|_| ())
            .ok_or_else(|| IngestError::not_found("IngestManifest", manifest_id))
    }
}
