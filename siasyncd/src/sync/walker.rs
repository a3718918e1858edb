use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::paths::is_hidden_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileEntry {
    pub absolute_path: PathBuf,
    pub relative_path: PathBuf,
    pub size_bytes: u64,
    pub is_hidden: bool,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    pub files: Vec<LocalFileEntry>,
    pub dirs: Vec<LocalFileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    Listed(DirListing),
    /// The directory could not be read; callers skip it and carry on.
    PermissionDenied,
    DepthExceeded,
}

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("failed to read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("entry is outside the sync root: {0}")]
    OutsideRoot(PathBuf),
}

/// Lists one directory level below `root`. Hidden entries and symlinks are
/// left out; files and subdirectories come back sorted by name.
pub async fn walk_level(
    root: &Path,
    dir: &Path,
    depth: usize,
    limit: usize,
) -> Result<WalkOutcome, WalkError> {
    if depth > limit {
        return Ok(WalkOutcome::DepthExceeded);
    }

    let io_error = |source: std::io::Error| WalkError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            return Ok(WalkOutcome::PermissionDenied);
        }
        Err(err) => return Err(io_error(err)),
    };

    let mut listing = DirListing::default();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                return Ok(WalkOutcome::PermissionDenied);
            }
            Err(err) => return Err(io_error(err)),
        };
        let is_hidden = is_hidden_name(&entry.file_name());
        let absolute_path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(err) => {
                tracing::debug!(path = %absolute_path.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if file_type.is_symlink() {
            continue;
        }
        let relative_path = absolute_path
            .strip_prefix(root)
            .map_err(|_| WalkError::OutsideRoot(absolute_path.clone()))?
            .to_path_buf();

        if file_type.is_dir() {
            listing.dirs.push(LocalFileEntry {
                absolute_path,
                relative_path,
                size_bytes: 0,
                is_hidden,
                is_directory: true,
            });
        } else if file_type.is_file() {
            // The file may disappear between listing and stat.
            let size_bytes = match entry.metadata().await {
                Ok(meta) => meta.len(),
                Err(err) => {
                    tracing::debug!(path = %absolute_path.display(), error = %err, "skipping vanished file");
                    continue;
                }
            };
            listing.files.push(LocalFileEntry {
                absolute_path,
                relative_path,
                size_bytes,
                is_hidden,
                is_directory: false,
            });
        }
    }

    listing.files.retain(|entry| !entry.is_hidden);
    listing.dirs.retain(|entry| !entry.is_hidden);
    listing
        .files
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    listing
        .dirs
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(WalkOutcome::Listed(listing))
}
