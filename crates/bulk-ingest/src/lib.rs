//! Bulk Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ingests a local folder of media files into a media service and publishes
//! it for adaptive streaming.
//!
//! # Overview
//!
//! - **Direct upload**: this process pushes every file through a temporary
//!   write locator, many files and many blocks at a time ([`upload`])
//! - **External upload**: files are declared in an ingest manifest that is
//!   polled until an out-of-band uploader has delivered them ([`external`])
//! - **Publication**: a SMIL `.ism` manifest becomes the primary file
//!   ([`manifest`]), then an origin locator yields Smooth Streaming, HLS and
//!   DASH URLs ([`publish`])
//!
//! Every component talks to the service through one
//! `Arc<dyn MediaService>` handle ([`service`]).
//!
//! # Example
//!
//! ```no_run
//! use bulk_ingest::{IngestConfig, IngestMode, Ingestor, InMemoryMediaService};
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = Arc::new(InMemoryMediaService::new());
//!     let ingestor = Ingestor::new(service, IngestConfig::default());
//!
//!     let outcome = ingestor
//!         .run(Path::new("./incoming"), IngestMode::Direct, &CancellationToken::new())
//!         .await?;
//!     println!("{}", outcome.publication.playback.hls);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod external;
pub mod manifest;
pub mod orchestrator;
pub mod progress;
pub mod publish;
pub mod service;
pub mod source;
pub mod upload;

// Re-export commonly used types
pub use config::{IngestConfig, Settings};
pub use error::{IngestError, Result};
pub use orchestrator::{IngestMode, IngestOutcome, Ingestor};
pub use service::{InMemoryMediaService, MediaService, RestMediaService};

use clap::Parser;
use std::path::PathBuf;

/// Bulk ingest - upload a folder of media files and publish it for streaming
#[derive(Parser, Debug)]
#[command(name = "bulk-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./bulk-ingest.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Folder to ingest; overrides `watch_folder` from the config
    #[arg(short, long, env = "BULK_INGEST_WATCH_FOLDER")]
    pub watch_folder: Option<PathBuf>,

    /// Upload mode: D (direct) or E (external). Prompts when omitted.
    #[arg(short, long)]
    pub mode: Option<IngestMode>,

    /// Run against an in-process service instead of the real one
    #[arg(long)]
    pub dry_run: bool,

    /// Exit right after printing the playback URLs
    #[arg(long)]
    pub no_wait: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
