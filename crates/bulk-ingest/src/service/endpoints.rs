//! REST endpoint URL builders
//!
//! Entity keys are OData string literals: `Assets('nb%3Acid%3AUUID%3A...')`.

use url::form_urlencoded;

fn base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

/// Quote and percent-encode an entity id for use inside `('...')`
fn key(id: &str) -> String {
    let escaped = id.replace('\'', "''");
    form_urlencoded::byte_serialize(escaped.as_bytes()).collect()
}

pub fn assets_url(base_url: &str) -> String {
    format!("{}/Assets", base(base_url))
}

pub fn asset_url(base_url: &str, asset_id: &str) -> String {
    format!("{}/Assets('{}')", base(base_url), key(asset_id))
}

pub fn asset_files_url(base_url: &str, asset_id: &str) -> String {
    format!("{}/Files", asset_url(base_url, asset_id))
}

pub fn files_url(base_url: &str) -> String {
    format!("{}/Files", base(base_url))
}

pub fn file_url(base_url: &str, file_id: &str) -> String {
    format!("{}/Files('{}')", base(base_url), key(file_id))
}

pub fn access_policies_url(base_url: &str) -> String {
    format!("{}/AccessPolicies", base(base_url))
}

pub fn access_policy_url(base_url: &str, policy_id: &str) -> String {
    format!("{}/AccessPolicies('{}')", base(base_url), key(policy_id))
}

pub fn locators_url(base_url: &str) -> String {
    format!("{}/Locators", base(base_url))
}

pub fn locator_url(base_url: &str, locator_id: &str) -> String {
    format!("{}/Locators('{}')", base(base_url), key(locator_id))
}

pub fn ingest_manifests_url(base_url: &str) -> String {
    format!("{}/IngestManifests", base(base_url))
}

pub fn ingest_manifest_url(base_url: &str, manifest_id: &str) -> String {
    format!("{}/IngestManifests('{}')", base(base_url), key(manifest_id))
}

pub fn ingest_manifest_assets_url(base_url: &str) -> String {
    format!("{}/IngestManifestAssets", base(base_url))
}

pub fn ingest_manifest_files_url(base_url: &str) -> String {
    format!("{}/IngestManifestFiles", base(base_url))
}
