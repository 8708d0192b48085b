//! Bulk Ingest Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the bulk ingest workspace.
//!
//! # Overview
//!
//! - **Types**: the media service resources an ingest run touches (assets,
//!   asset files, access policies, locators, ingest manifests)
//! - **Error Handling**: shared error and result types
//! - **Checksums**: content hashing for uploaded files and blocks
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use bulk_ingest_common::types::ManifestStatistics;
//!
//! let stats = ManifestStatistics::new(3, 1);
//! assert!(!stats.is_finished());
//! println!("{:.1}% complete", stats.percent_complete());
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
