//! Publication finalizer
//!
//! Makes a published asset streamable: grants read access through the
//! shared streaming policy, mints an origin locator and derives the
//! Smooth Streaming, HLS and MPEG-DASH URLs.

use bulk_ingest_common::types::{
    AccessPermissions, AccessPolicy, Asset, AssetFile, Locator, LocatorKind, PlaybackUris,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::service::{LocatorRequest, MediaService};

/// Everything a client needs to play the asset
#[derive(Debug, Clone)]
pub struct Publication {
    pub policy: AccessPolicy,
    pub locator: Locator,
    pub playback: PlaybackUris,
    /// The streaming policy already existed
    pub policy_reused: bool,
}

/// Playback URLs for `primary_file` under an origin locator
pub fn playback_uris(locator: &Locator, primary_file: &str) -> Result<PlaybackUris> {
    let manifest = |suffix: &str| -> Result<Url> {
        let mut url = locator.file_url(primary_file)?;
        url.path_segments_mut()
            .map_err(|_| IngestError::config(format!("locator path '{}' cannot be a base", locator.path)))?
            .push(suffix);
        Ok(url)
    };

    Ok(PlaybackUris {
        smooth_streaming: manifest("manifest")?,
        hls: manifest("manifest(format=m3u8-aapl)")?,
        mpeg_dash: manifest("manifest(format=mpd-time-csf)")?,
    })
}

pub struct PublicationFinalizer {
    service: Arc<dyn MediaService>,
    config: IngestConfig,
}

impl PublicationFinalizer {
    pub fn new(service: Arc<dyn MediaService>, config: IngestConfig) -> Self {
        Self { service, config }
    }

    /// Find the shared streaming policy by name, creating it when absent.
    ///
    /// Returns the policy and whether it already existed.
    pub async fn ensure_streaming_policy(&self) -> Result<(AccessPolicy, bool)> {
        let name = &self.config.streaming_policy_name;
        let existing = self
            .service
            .list_access_policies()
            .await?
            .into_iter()
            .find(|p| &p.name == name);

        if let Some(policy) = existing {
            info!(policy_id = %policy.id, "Reusing streaming policy");
            return Ok((policy, true));
        }

        let policy = self
            .service
            .create_access_policy(
                name,
                self.config.streaming_policy_duration(),
                AccessPermissions::READ,
            )
            .await?;
        info!(policy_id = %policy.id, "Created streaming policy");
        Ok((policy, false))
    }

    /// Mint the origin locator for `asset` and derive its playback URLs.
    ///
    /// `files` is the asset's current file list; it must satisfy
    /// [`Asset::is_publishable`].
    #[instrument(skip_all, fields(asset_id = %asset.id, primary = %primary_file.name))]
    pub async fn publish(
        &self,
        asset: &Asset,
        primary_file: &AssetFile,
        files: &[AssetFile],
    ) -> Result<Publication> {
        if !Asset::is_publishable(files) || !files.iter().any(|f| f.id == primary_file.id && f.is_primary) {
            return Err(IngestError::not_ready(
                &asset.id,
                "every file must be uploaded with exactly one primary manifest",
            ));
        }

        let (policy, policy_reused) = self.ensure_streaming_policy().await?;

        let locator = self
            .service
            .create_locator(LocatorRequest {
                kind: LocatorKind::OnDemandOrigin,
                asset_id: &asset.id,
                policy_id: &policy.id,
                start_time: Some(Utc::now() - self.config.locator_start_skew()),
            })
            .await?;

        let playback = playback_uris(&locator, &primary_file.name)?;
        info!(locator_id = %locator.id, "Streaming URLs ready");

        Ok(Publication {
            policy,
            locator,
            playback,
            policy_reused,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn origin_locator(path: &str) -> Locator {
        Locator {
            id: "loc-1".to_string(),
            kind: LocatorKind::OnDemandOrigin,
            asset_id: "asset-1".to_string(),
            access_policy_id: "pol-1".to_string(),
            path: Url::parse(path).unwrap(),
            start_time: None,
            expiration_date_time: Utc::now() + Duration::days(30),
        }
    }

    #[test]
    fn test_playback_uris() {
        let locator = origin_locator("https://origin.example.net/0d1e2f/");
        let uris = playback_uris(&locator, "movie.ism").unwrap();

        assert_eq!(
            uris.smooth_streaming.as_str(),
            "https://origin.example.net/0d1e2f/movie.ism/manifest"
        );
        assert_eq!(
            uris.hls.as_str(),
            "https://origin.example.net/0d1e2f/movie.ism/manifest(format=m3u8-aapl)"
        );
        assert_eq!(
            uris.mpeg_dash.as_str(),
            "https://origin.example.net/0d1e2f/movie.ism/manifest(format=mpd-time-csf)"
        );
    }

    #[test]
    fn test_playback_uris_without_trailing_slash() {
        let locator = origin_locator("https://origin.example.net/0d1e2f");
        let uris = playback_uris(&locator, "a.ism").unwrap();
        assert_eq!(uris.smooth_streaming.path(), "/0d1e2f/a.ism/manifest");
    }
}
