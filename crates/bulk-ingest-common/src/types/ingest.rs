use serde::{Deserialize, Serialize};
use url::Url;

/// Live counters reported by the service for an ingest manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestStatistics {
    pub pending_files_count: u32,
    pub finished_files_count: u32,
}

impl ManifestStatistics {
    pub fn new(pending: u32, finished: u32) -> Self {
        Self {
            pending_files_count: pending,
            finished_files_count: finished,
        }
    }

    /// Completion depends only on the pending count. A manifest with nothing
    /// pending is finished even if nothing was reported finished.
    pub fn is_finished(&self) -> bool {
        self.pending_files_count == 0
    }

    /// `finished / (finished + pending) * 100`, or 0 when both are zero.
    pub fn percent_complete(&self) -> f64 {
        let total = u64::from(self.finished_files_count) + u64::from(self.pending_files_count);
        if total == 0 {
            return 0.0;
        }
        self.finished_files_count as f64 / total as f64 * 100.0
    }
}

/// Batch registration of file names that an external actor will upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestManifest {
    pub id: String,
    pub name: String,

    /// Where the external actor is expected to put the bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_storage_uri_for_upload: Option<Url>,

    #[serde(default)]
    pub statistics: ManifestStatistics,
}
