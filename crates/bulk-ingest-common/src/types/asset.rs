use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// A named container of media files; the unit of publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Asset {
    /// Opaque service identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Caller-chosen secondary identifier, used to correlate re-runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_id: Option<String>,

    pub created: DateTime<Utc>,
}

/// Upload status of a single asset file, as far as the service reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Registered with the service, no content reported yet
    Pending,
    /// The service reports committed content
    Uploaded,
}

/// One file owned by an asset. Names are unique within the asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetFile {
    pub id: String,

    #[serde(rename = "ParentAssetId")]
    pub asset_id: String,

    pub name: String,

    /// Size of the committed content. Int64 properties may arrive as strings.
    #[serde(default, deserialize_with = "u64_from_number_or_string")]
    pub content_file_size: u64,

    #[serde(default)]
    pub is_primary: bool,

    /// Hex SHA-256 of the committed content
    #[serde(rename = "ContentChecksum", default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl AssetFile {
    /// The service keeps no upload flag. A file counts as uploaded once it
    /// reports a non-zero content size, whether the size was recorded after a
    /// direct upload or by the service after an external delivery.
    pub fn upload_state(&self) -> UploadState {
        if self.content_file_size > 0 {
            UploadState::Uploaded
        } else {
            UploadState::Pending
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.upload_state() == UploadState::Uploaded
    }
}

impl Asset {
    /// An asset can be published once every file is uploaded and exactly one
    /// primary file exists.
    pub fn is_publishable(files: &[AssetFile]) -> bool {
        !files.is_empty()
            && files.iter().all(AssetFile::is_uploaded)
            && files.iter().filter(|f| f.is_primary).count() == 1
    }
}

fn u64_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}
