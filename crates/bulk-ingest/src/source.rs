//! Watch folder enumeration

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// A local file selected for ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// File name without directories; becomes the asset file name
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// List the regular files directly inside `dir`, sorted by name.
///
/// Subdirectories are skipped, symlinks are followed. Names that are not
/// valid UTF-8 cannot be registered with the service and are skipped with a
/// warning, as are zero-byte files: the service only reports a file as
/// uploaded once it holds content. A folder left empty is an error so that
/// no asset gets created for it.
pub async fn scan_directory(dir: &Path) -> Result<Vec<SourceFile>> {
    let source_err = |source| IngestError::SourceDirectory {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(source_err)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(source_err)? {
        let path = entry.path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %path.display(), "Skipping file with a non UTF-8 name");
            continue;
        };
        if metadata.len() == 0 {
            warn!(file = %name, "Skipping empty file");
            continue;
        }

        files.push(SourceFile {
            name,
            path,
            size: metadata.len(),
        });
    }

    if files.is_empty() {
        return Err(IngestError::EmptySource(dir.to_path_buf()));
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(folder = %dir.display(), count = files.len(), "Scanned watch folder");
    Ok(files)
}
