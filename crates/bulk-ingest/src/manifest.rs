//! Server playback manifest (`.ism`) generation and upload
//!
//! The manifest is a SMIL 2.0 document listing the video and audio tracks
//! of an asset. Once uploaded it becomes the asset's primary file, which is
//! what the streaming origin resolves playback URLs against.

use bulk_ingest_common::checksum::sha256_hex;
use bulk_ingest_common::types::{Asset, AssetFile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::service::MediaService;
use crate::upload::{upload_bytes, WriteAccess};

pub const SMIL_NAMESPACE: &str = "http://www.w3.org/2001/SMIL20/Language";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8" standalone="yes"?>"#;
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "ismv"];
const AUDIO_EXTENSIONS: &[&str] = &["m4a", "isma"];
const FALLBACK_STEM: &str = "manifest";

/// Track type of a file, decided by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    #[serde(rename = "@src")]
    pub src: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Meta {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@content")]
    content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Head {
    meta: Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    #[serde(default)]
    pub video: Vec<Track>,
    #[serde(default)]
    pub audio: Vec<Track>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Body {
    switch: Switch,
}

/// SMIL server manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "smil")]
pub struct ServerManifest {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    head: Head,
    body: Body,
}

impl ServerManifest {
    /// Build the document from asset file names.
    ///
    /// Files that are neither video nor audio are left out. Without an
    /// audio-only file the first video doubles as the audio track. Returns
    /// `None` when no file qualifies.
    pub fn from_file_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut video = Vec::new();
        let mut audio = Vec::new();

        for name in names {
            let track = Track {
                src: name.to_string(),
            };
            match MediaKind::from_file_name(name) {
                Some(MediaKind::Video) => video.push(track),
                Some(MediaKind::Audio) => audio.push(track),
                None => {}
            }
        }

        if video.is_empty() && audio.is_empty() {
            return None;
        }
        if audio.is_empty() {
            audio.push(video[0].clone());
        }

        Some(Self {
            xmlns: SMIL_NAMESPACE.to_string(),
            head: Head {
                meta: Meta {
                    name: "formats".to_string(),
                    content: "mp4".to_string(),
                },
            },
            body: Body {
                switch: Switch { video, audio },
            },
        })
    }

    pub fn tracks(&self) -> &Switch {
        &self.body.switch
    }

    /// Indented XML with a declaration
    pub fn to_xml(&self) -> Result<String> {
        let mut body = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut body);
        serializer.indent(' ', 2);
        self.serialize(serializer).map_err(IngestError::xml)?;

        Ok(format!("{XML_DECLARATION}\n{body}\n"))
    }
}

/// `.ism` name for a set of asset files.
///
/// Uses the longest common stem of the video files (audio files when there
/// is no video), with trailing separators trimmed. Falls back to
/// `manifest.ism`, and appends `-1`, `-2`, ... if the name is taken.
pub fn manifest_file_name(names: &[&str]) -> String {
    let media: Vec<&str> = names
        .iter()
        .copied()
        .filter(|n| MediaKind::from_file_name(n).is_some())
        .collect();
    let videos: Vec<&str> = media
        .iter()
        .copied()
        .filter(|n| MediaKind::from_file_name(n) == Some(MediaKind::Video))
        .collect();
    let candidates = if videos.is_empty() { &media } else { &videos };

    let stems: Vec<&str> = candidates
        .iter()
        .filter_map(|n| Path::new(n).file_stem().and_then(|s| s.to_str()))
        .collect();

    let common = common_prefix(&stems);
    let trimmed = common.trim_end_matches(['_', '-', '.', ' ']);
    let stem = if trimmed.is_empty() { FALLBACK_STEM } else { trimmed };

    let taken: HashSet<&str> = names.iter().copied().collect();
    let mut name = format!("{stem}.ism");
    let mut suffix = 1;
    while taken.contains(name.as_str()) {
        name = format!("{stem}-{suffix}.ism");
        suffix += 1;
    }
    name
}

fn common_prefix<'a>(items: &[&'a str]) -> &'a str {
    let Some((first, rest)) = items.split_first() else {
        return "";
    };

    let mut end = first.len();
    for item in rest {
        end = first
            .char_indices()
            .zip(item.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map_or(0, |((i, a), _)| i + a.len_utf8())
            .min(end);
    }
    &first[..end]
}

/// Generates, uploads and promotes the playback manifest of an asset
pub struct ManifestPublisher {
    service: Arc<dyn MediaService>,
    config: IngestConfig,
}

impl ManifestPublisher {
    pub fn new(service: Arc<dyn MediaService>, config: IngestConfig) -> Self {
        Self { service, config }
    }

    /// Publish the `.ism` for `files` and make it the only primary file.
    #[instrument(skip_all, fields(asset_id = %asset.id, files = files.len()))]
    pub async fn publish(&self, asset: &Asset, files: &[AssetFile]) -> Result<AssetFile> {
        let pending: Vec<&str> = files
            .iter()
            .filter(|f| !f.is_uploaded())
            .map(|f| f.name.as_str())
            .collect();
        if !pending.is_empty() {
            return Err(IngestError::not_ready(
                &asset.id,
                format!("files still pending: {}", pending.join(", ")),
            ));
        }

        let document = ServerManifest::from_file_names(files.iter().map(|f| f.name.as_str()))
            .ok_or_else(|| IngestError::NoMediaFiles(asset.id.clone()))?;
        let xml = document.to_xml()?;

        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        let name = manifest_file_name(&names);
        info!(manifest = %name, "Generating .ism file for the asset");

        let mut manifest_file = self.service.create_asset_file(&asset.id, &name).await?;

        let access = WriteAccess::acquire(
            self.service.as_ref(),
            asset,
            self.config.upload_policy_duration(),
            self.config.locator_start_skew(),
        )
        .await?;
        let uploaded = upload_bytes(
            self.service.as_ref(),
            &access.locator,
            &name,
            xml.as_bytes(),
            self.config.block_size_bytes,
        )
        .await;
        access.release(self.service.as_ref()).await;
        uploaded?;

        manifest_file.content_file_size = xml.len() as u64;
        manifest_file.checksum = Some(sha256_hex(xml.as_bytes()));
        manifest_file.is_primary = true;
        self.service.update_asset_file(&manifest_file).await?;

        for other in files.iter().filter(|f| f.is_primary) {
            let mut demoted = other.clone();
            demoted.is_primary = false;
            self.service.update_asset_file(&demoted).await?;
            debug!(file = %other.name, "Cleared primary flag");
        }

        debug!(file_id = %manifest_file.id, bytes = xml.len(), "Manifest set as primary");
        Ok(manifest_file)
    }
}
