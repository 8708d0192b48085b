//! Error types for ingest runs
//!
//! Every failure is terminal for the run. Messages name the resource
//! involved so the operator can find and clean up a partial asset.

use bulk_ingest_common::CommonError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// One file that failed inside a batch upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub file: String,
    pub reason: String,
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.file, self.reason)
    }
}

fn join_failures(failures: &[FileFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum IngestError {
    /// The watch folder is missing or unreadable
    #[error("Cannot read watch folder '{}': {source}", .path.display())]
    SourceDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The watch folder has no regular files
    #[error("Watch folder '{}' contains no files to ingest", .0.display())]
    EmptySource(PathBuf),

    /// Nothing in the asset can be referenced by a playback manifest
    #[error("Asset '{0}' has no media files a playback manifest can reference")]
    NoMediaFiles(String),

    /// Files are still pending, so the asset cannot be published yet
    #[error("Asset '{asset_id}' is not ready for publication: {reason}")]
    AssetNotReady { asset_id: String, reason: String },

    /// The media service answered with a non-success status
    #[error("Media service returned {status}: {message}")]
    Service { status: u16, message: String },

    /// The media service refused a request it understood
    #[error("Media service rejected the request: {0}")]
    Rejected(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Network request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML generation failed: {0}")]
    Xml(String),

    #[error(transparent)]
    Common(#[from] CommonError),

    /// At least one transfer of a direct upload batch failed
    #[error("{} of {total} file uploads failed: {}", .failures.len(), join_failures(.failures))]
    BatchUpload {
        failures: Vec<FileFailure>,
        total: usize,
    },

    /// The external upload did not finish inside the configured window
    #[error("Ingest manifest '{manifest_id}' still had {pending} pending files after {waited:?}")]
    PollTimeout {
        manifest_id: String,
        pending: u32,
        waited: Duration,
    },

    #[error("Ingest run cancelled")]
    Cancelled,

    #[error("Invalid upload mode '{0}'. Enter D for direct upload or E for external upload.")]
    InvalidMode(String),

    #[error("Configuration error: {0}. Check bulk-ingest.toml or the BULK_INGEST_* environment variables.")]
    Config(String),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn xml(err: impl std::fmt::Display) -> Self {
        Self::Xml(err.to_string())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn not_ready(asset_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AssetNotReady {
            asset_id: asset_id.into(),
            reason: reason.into(),
        }
    }
}
