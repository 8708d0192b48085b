//! Configuration management
//!
//! Settings are layered: built-in defaults, then an optional TOML file
//! (`bulk-ingest.toml` in the working directory, or `--config`), then
//! `BULK_INGEST_*` environment variables. Nested keys use `__`, e.g.
//! `BULK_INGEST_INGEST__CONCURRENT_TRANSFERS=8`.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "bulk-ingest.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "BULK_INGEST";

/// Default media service REST endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://media.windows.net/api";

/// Default token endpoint for the account name/key exchange.
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://wamsprodglobal001acs.accesscontrol.windows.net/v2/OAuth2-13";

/// Default timeout for a single service request in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Files uploaded in parallel by the direct upload engine.
pub const DEFAULT_CONCURRENT_TRANSFERS: usize = 20;

/// Blocks in flight per file.
pub const DEFAULT_PARALLEL_TRANSFER_THREADS: usize = 20;

/// Size of one upload block (4 MiB).
pub const DEFAULT_BLOCK_SIZE_BYTES: usize = 4 * 1024 * 1024;

/// Lifetime of the temporary write policy used for uploads.
pub const DEFAULT_UPLOAD_POLICY_HOURS: i64 = 24;

/// Interval between ingest manifest polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Name of the long-lived read policy shared by every published asset.
pub const DEFAULT_STREAMING_POLICY_NAME: &str = "Streaming policy";

/// Lifetime of the streaming policy.
pub const DEFAULT_STREAMING_POLICY_DAYS: i64 = 30;

/// How far locator start times are back-dated to tolerate clock skew.
pub const DEFAULT_LOCATOR_START_SKEW_MINS: i64 = 5;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Folder whose files are ingested
    pub watch_folder: PathBuf,

    /// Media service account name
    pub account_name: String,

    /// Media service account key
    pub account_key: String,

    pub api_endpoint: String,
    pub token_endpoint: String,
    pub request_timeout_secs: u64,

    pub ingest: IngestConfig,
}

/// Tuning for the ingest run itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Fan-out across files
    pub concurrent_transfers: usize,

    /// Block parallelism inside one file
    pub parallel_transfer_threads: usize,

    pub block_size_bytes: usize,
    pub upload_policy_hours: i64,
    pub poll_interval_secs: u64,

    /// Unset means poll until the external upload finishes
    pub poll_timeout_secs: Option<u64>,

    pub streaming_policy_name: String,
    pub streaming_policy_days: i64,
    pub locator_start_skew_mins: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch_folder: PathBuf::new(),
            account_name: String::new(),
            account_key: String::new(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            ingest: IngestConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrent_transfers: DEFAULT_CONCURRENT_TRANSFERS,
            parallel_transfer_threads: DEFAULT_PARALLEL_TRANSFER_THREADS,
            block_size_bytes: DEFAULT_BLOCK_SIZE_BYTES,
            upload_policy_hours: DEFAULT_UPLOAD_POLICY_HOURS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_timeout_secs: None,
            streaming_policy_name: DEFAULT_STREAMING_POLICY_NAME.to_string(),
            streaming_policy_days: DEFAULT_STREAMING_POLICY_DAYS,
            locator_start_skew_mins: DEFAULT_LOCATOR_START_SKEW_MINS,
        }
    }
}

impl IngestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_secs.map(Duration::from_secs)
    }

    pub fn upload_policy_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.upload_policy_hours)
    }

    pub fn streaming_policy_duration(&self) -> chrono::Duration {
        chrono::Duration::days(self.streaming_policy_days)
    }

    pub fn locator_start_skew(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.locator_start_skew_mins)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrent_transfers == 0 {
            return Err(IngestError::config("concurrent_transfers must be greater than 0"));
        }
        if self.parallel_transfer_threads == 0 {
            return Err(IngestError::config("parallel_transfer_threads must be greater than 0"));
        }
        if self.block_size_bytes == 0 {
            return Err(IngestError::config("block_size_bytes must be greater than 0"));
        }
        if self.upload_policy_hours <= 0 {
            return Err(IngestError::config("upload_policy_hours must be greater than 0"));
        }
        if self.poll_interval_secs == 0 {
            return Err(IngestError::config("poll_interval_secs must be greater than 0"));
        }
        if self.streaming_policy_name.trim().is_empty() {
            return Err(IngestError::config("streaming_policy_name cannot be empty"));
        }
        if self.streaming_policy_days <= 0 {
            return Err(IngestError::config("streaming_policy_days must be greater than 0"));
        }
        if self.locator_start_skew_mins < 0 {
            return Err(IngestError::config("locator_start_skew_mins cannot be negative"));
        }
        Ok(())
    }
}

impl Settings {
    /// Load settings from `.env`, the config file and the environment.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file_source = match config_file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| IngestError::config(e.to_string()))?;

        Ok(settings)
    }

    /// Validate everything a run needs.
    ///
    /// Credentials are only required when talking to a real service.
    pub fn validate(&self, require_credentials: bool) -> Result<()> {
        if self.watch_folder.as_os_str().is_empty() {
            return Err(IngestError::config("watch_folder is not set"));
        }

        if require_credentials {
            if self.account_name.trim().is_empty() {
                return Err(IngestError::config("account_name is not set"));
            }
            if self.account_key.trim().is_empty() {
                return Err(IngestError::config("account_key is not set"));
            }
            url::Url::parse(&self.api_endpoint)
                .map_err(|e| IngestError::config(format!("api_endpoint is not a valid URL: {e}")))?;
            url::Url::parse(&self.token_endpoint)
                .map_err(|e| IngestError::config(format!("token_endpoint is not a valid URL: {e}")))?;
        }

        if self.request_timeout_secs == 0 {
            return Err(IngestError::config("request_timeout_secs must be greater than 0"));
        }

        self.ingest.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
