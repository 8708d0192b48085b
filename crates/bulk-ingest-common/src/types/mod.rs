//! Media service resources touched by an ingest run
//!
//! These mirror the remote service's entities closely enough to be sent and
//! received as JSON (PascalCase field names), while keeping the predicates
//! the orchestration depends on (completion, permissions, primary file)
//! next to the data.

mod access;
mod asset;
mod ingest;
mod playback;

pub use access::{AccessPermissions, AccessPolicy, Locator, LocatorKind};
pub use asset::{Asset, AssetFile, UploadState};
pub use ingest::{IngestManifest, ManifestStatistics};
pub use playback::PlaybackUris;
