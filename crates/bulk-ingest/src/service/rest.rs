//! HTTP client for the media service REST API
//!
//! Management calls go to the OData-style API with a bearer token obtained
//! from the account name/key pair. Content never passes through the API: it
//! is staged as blocks directly against the storage URL of a SAS locator.

use async_trait::async_trait;
use bulk_ingest_common::checksum::block_md5_base64;
use bulk_ingest_common::types::{
    AccessPermissions, AccessPolicy, Asset, AssetFile, IngestManifest, Locator,
};
use chrono::Duration;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{endpoints, LocatorRequest, MediaService};
use crate::config::Settings;
use crate::error::{IngestError, Result};

// ============================================================================
// REST Client Constants
// ============================================================================

/// API version sent with every management request.
pub const API_VERSION: &str = "2.19";

/// Storage API version sent with block uploads.
pub const STORAGE_VERSION: &str = "2017-04-17";

/// Scope requested in the client-credentials exchange.
pub const TOKEN_SCOPE: &str = "urn:WindowsAzureMediaServices";

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: std::time::Duration = std::time::Duration::from_secs(60);

/// Connection details for [`RestMediaService`]
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub api_endpoint: String,
    pub token_endpoint: String,
    pub account_name: String,
    pub account_key: String,
    pub request_timeout: std::time::Duration,
}

impl From<&Settings> for RestConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            api_endpoint: settings.api_endpoint.clone(),
            token_endpoint: settings.token_endpoint.clone(),
            account_name: settings.account_name.clone(),
            account_key: settings.account_key.clone(),
            request_timeout: settings.request_timeout(),
        }
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    /// `expires_in` arrives as either a number or a numeric string
    fn lifetime(&self) -> std::time::Duration {
        let secs = match &self.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        std::time::Duration::from_secs(secs.unwrap_or(3600))
    }
}

/// OData collection wrapper
#[derive(Deserialize)]
struct ODataList<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EntityId {
    id: String,
}

/// Asset file properties the client may change. Int64 travels as a string.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AssetFileUpdate<'a> {
    name: &'a str,
    content_file_size: String,
    is_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_checksum: Option<&'a str>,
}

impl<'a> From<&'a AssetFile> for AssetFileUpdate<'a> {
    fn from(file: &'a AssetFile) -> Self {
        Self {
            name: &file.name,
            content_file_size: file.content_file_size.to_string(),
            is_primary: file.is_primary,
            content_checksum: file.checksum.as_deref(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename = "BlockList")]
struct BlockList<'a> {
    #[serde(rename = "Latest")]
    latest: &'a [String],
}

/// Media service client over HTTP
pub struct RestMediaService {
    client: Client,
    config: RestConfig,
    token: Mutex<Option<CachedToken>>,
}

impl RestMediaService {
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.api_endpoint
    }

    /// Current bearer token, fetching a new one when missing or about to expire
    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        debug!(endpoint = %self.config.token_endpoint, "Requesting access token");

        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.account_name.as_str()),
                ("client_secret", self.config.account_key.as_str()),
                ("scope", TOKEN_SCOPE),
            ])
            .send()
            .await?;
        let token: TokenResponse = check(response).await?.json().await?;

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + token.lifetime(),
        });

        Ok(value)
    }

    async fn api(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.bearer_token().await?;

        Ok(self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("x-ms-version", API_VERSION)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        check(request.send().await?).await?;
        Ok(())
    }
}

/// Turn a non-success status into [`IngestError::Service`]
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(IngestError::Service {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            message
        },
    })
}

#[async_trait]
impl MediaService for RestMediaService {
    #[instrument(skip(self))]
    async fn create_asset(&self, name: &str) -> Result<Asset> {
        let url = endpoints::assets_url(self.base_url());
        let request = self
            .api(Method::POST, &url)
            .await?
            .json(&json!({ "Name": name, "Options": 0 }));
        self.send_json(request).await
    }

    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    async fn update_asset(&self, asset: &Asset) -> Result<()> {
        let url = endpoints::asset_url(self.base_url(), &asset.id);
        let request = self.api(Method::PATCH, &url).await?.json(&json!({
            "Name": asset.name,
            "AlternateId": asset.alternate_id,
        }));
        self.send_empty(request).await
    }

    #[instrument(skip(self))]
    async fn create_asset_file(&self, asset_id: &str, name: &str) -> Result<AssetFile> {
        let url = endpoints::files_url(self.base_url());
        let request = self.api(Method::POST, &url).await?.json(&json!({
            "Name": name,
            "ParentAssetId": asset_id,
            "IsPrimary": false,
            "IsEncrypted": false,
        }));
        self.send_json(request).await
    }

    #[instrument(skip(self, file), fields(file = %file.name))]
    async fn update_asset_file(&self, file: &AssetFile) -> Result<()> {
        let url = endpoints::file_url(self.base_url(), &file.id);
        let request = self
            .api(Method::PATCH, &url)
            .await?
            .json(&AssetFileUpdate::from(file));
        self.send_empty(request).await
    }

    async fn list_asset_files(&self, asset_id: &str) -> Result<Vec<AssetFile>> {
        let url = endpoints::asset_files_url(self.base_url(), asset_id);
        let request = self.api(Method::GET, &url).await?;
        let list: ODataList<AssetFile> = self.send_json(request).await?;
        Ok(list.value)
    }

    async fn upload_block(
        &self,
        locator: &Locator,
        file_name: &str,
        block_id: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut url = locator.file_url(file_name)?;
        url.query_pairs_mut()
            .append_pair("comp", "block")
            .append_pair("blockid", block_id);

        let request = self
            .client
            .put(url)
            .header("x-ms-version", STORAGE_VERSION)
            .header("Content-MD5", block_md5_base64(&data))
            .body(data);
        self.send_empty(request).await
    }

    #[instrument(skip(self, locator, block_ids), fields(blocks = block_ids.len()))]
    async fn commit_blocks(
        &self,
        locator: &Locator,
        file_name: &str,
        block_ids: &[String],
    ) -> Result<()> {
        let mut url = locator.file_url(file_name)?;
        url.query_pairs_mut().append_pair("comp", "blocklist");

        let body = quick_xml::se::to_string(&BlockList { latest: block_ids })
            .map_err(IngestError::xml)?;

        let request = self
            .client
            .put(url)
            .header("x-ms-version", STORAGE_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>{body}"));
        self.send_empty(request).await
    }

    async fn list_access_policies(&self) -> Result<Vec<AccessPolicy>> {
        let url = endpoints::access_policies_url(self.base_url());
        let request = self.api(Method::GET, &url).await?;
        let list: ODataList<AccessPolicy> = self.send_json(request).await?;
        Ok(list.value)
    }

    #[instrument(skip(self, duration, permissions), fields(permissions = %permissions))]
    async fn create_access_policy(
        &self,
        name: &str,
        duration: Duration,
        permissions: AccessPermissions,
    ) -> Result<AccessPolicy> {
        let url = endpoints::access_policies_url(self.base_url());
        let request = self.api(Method::POST, &url).await?.json(&json!({
            "Name": name,
            "DurationInMinutes": duration.num_seconds() as f64 / 60.0,
            "Permissions": permissions,
        }));
        self.send_json(request).await
    }

    async fn delete_access_policy(&self, policy_id: &str) -> Result<()> {
        let url = endpoints::access_policy_url(self.base_url(), policy_id);
        let request = self.api(Method::DELETE, &url).await?;
        self.send_empty(request).await
    }

    #[instrument(skip(self, request), fields(kind = ?request.kind, asset_id = request.asset_id))]
    async fn create_locator(&self, request: LocatorRequest<'_>) -> Result<Locator> {
        let url = endpoints::locators_url(self.base_url());
        let body = json!({
            "AccessPolicyId": request.policy_id,
            "AssetId": request.asset_id,
            "StartTime": request.start_time,
            "Type": request.kind,
        });
        let builder = self.api(Method::POST, &url).await?.json(&body);
        self.send_json(builder).await
    }

    async fn delete_locator(&self, locator_id: &str) -> Result<()> {
        let url = endpoints::locator_url(self.base_url(), locator_id);
        let request = self.api(Method::DELETE, &url).await?;
        self.send_empty(request).await
    }

    #[instrument(skip(self))]
    async fn create_ingest_manifest(&self, name: &str) -> Result<IngestManifest> {
        let url = endpoints::ingest_manifests_url(self.base_url());
        let request = self
            .api(Method::POST, &url)
            .await?
            .json(&json!({ "Name": name }));
        self.send_json(request).await
    }

    #[instrument(skip(self, file_names), fields(files = file_names.len()))]
    async fn register_manifest_files(
        &self,
        manifest_id: &str,
        asset_id: &str,
        file_names: &[String],
    ) -> Result<()> {
        let url = endpoints::ingest_manifest_assets_url(self.base_url());
        let request = self.api(Method::POST, &url).await?.json(&json!({
            "ParentIngestManifestId": manifest_id,
            "Asset": { "Id": asset_id },
        }));
        let manifest_asset: EntityId = self.send_json(request).await?;

        let files_url = endpoints::ingest_manifest_files_url(self.base_url());
        for name in file_names {
            let request = self.api(Method::POST, &files_url).await?.json(&json!({
                "Name": name,
                "ParentIngestManifestId": manifest_id,
                "ParentIngestManifestAssetId": manifest_asset.id,
            }));
            self.send_empty(request).await?;
        }

        Ok(())
    }

    async fn get_ingest_manifest(&self, manifest_id: &str) -> Result<IngestManifest> {
        let url = endpoints::ingest_manifest_url(self.base_url(), manifest_id);
        let request = self.api(Method::GET, &url).await?;
        self.send_json(request).await
    }

    async fn delete_ingest_manifest(&self, manifest_id: &str) -> Result<()> {
        let url = endpoints::ingest_manifest_url(self.base_url(), manifest_id);
        let request = self.api(Method::DELETE, &url).await?;
        self.send_empty(request).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lifetime_accepts_string_or_number() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"t","expires_in":"21600"}"#).unwrap();
        assert_eq!(token.lifetime().as_secs(), 21600);

        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"t","expires_in":120}"#).unwrap();
        assert_eq!(token.lifetime().as_secs(), 120);

        let token: TokenResponse = serde_json::from_str(r#"{"access_token":"t"}"#).unwrap();
        assert_eq!(token.lifetime().as_secs(), 3600);
    }

    #[test]
    fn test_file_update_carries_only_service_properties() {
        let file = AssetFile {
            id: "f1".to_string(),
            asset_id: "a1".to_string(),
            name: "a.mp4".to_string(),
            content_file_size: 42,
            is_primary: true,
            checksum: None,
        };
        let body = serde_json::to_value(AssetFileUpdate::from(&file)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "Name": "a.mp4", "ContentFileSize": "42", "IsPrimary": true })
        );
    }

    #[test]
    fn test_block_list_xml() {
        let ids = vec!["YQ==".to_string(), "Yg==".to_string()];
        let xml = quick_xml::se::to_string(&BlockList { latest: &ids }).unwrap();
        assert_eq!(xml, "<BlockList><Latest>YQ==</Latest><Latest>Yg==</Latest></BlockList>");
    }
}
