use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use siasync_integrations::ids::METADATA_FILE_EXTENSION;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("relative path is empty")]
    Empty,
    #[error("path contains unsupported component")]
    UnsupportedComponent,
    #[error("path is not valid unicode: {0}")]
    NotUnicode(PathBuf),
}

/// Maps a path relative to the sync root to the logical name the renter
/// tracks it under: `prefix/part<joiner>part...`.
pub fn logical_path_for(prefix: &str, joiner: &str, relative: &Path) -> Result<String, PathError> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| PathError::NotUnicode(relative.to_path_buf()))?,
            ),
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }

    let joined = parts.join(joiner);
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Ok(joined)
    } else {
        Ok(format!("{prefix}/{joined}"))
    }
}

/// Hidden sibling that receives a file's recovery metadata: `dir/.name.sia`.
pub fn metadata_path_for(local: &Path) -> Result<PathBuf, PathError> {
    let name = local
        .file_name()
        .ok_or(PathError::Empty)?
        .to_str()
        .ok_or_else(|| PathError::NotUnicode(local.to_path_buf()))?;
    Ok(local.with_file_name(format!(".{name}.{METADATA_FILE_EXTENSION}")))
}

pub fn is_hidden_name(name: &OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_top_level_file() {
        let logical = logical_path_for("Desktop", "/", Path::new("a.txt")).unwrap();
        assert_eq!(logical, "Desktop/a.txt");
    }

    #[test]
    fn replaces_separators_with_joiner() {
        let logical = logical_path_for("Sia", "__", Path::new("Docs/2024/a.txt")).unwrap();
        assert_eq!(logical, "Sia/Docs__2024__a.txt");
    }

    #[test]
    fn empty_prefix_yields_bare_relative_name() {
        let logical = logical_path_for("/", "/", Path::new("Docs/a.txt")).unwrap();
        assert_eq!(logical, "Docs/a.txt");
    }

    #[test]
    fn rejects_parent_dir() {
        assert!(matches!(
            logical_path_for("Sia", "/", Path::new("../secret")),
            Err(PathError::UnsupportedComponent)
        ));
    }

    #[test]
    fn rejects_empty_relative_path() {
        assert!(matches!(
            logical_path_for("Sia", "/", Path::new("")),
            Err(PathError::Empty)
        ));
    }

    #[test]
    fn metadata_path_is_hidden_sibling() {
        let path = metadata_path_for(Path::new("/home/user/Sia/Docs/b.txt")).unwrap();
        assert_eq!(path, PathBuf::from("/home/user/Sia/Docs/.b.txt.sia"));
        assert!(is_hidden_name(path.file_name().unwrap()));
    }

    #[test]
    fn dot_prefix_marks_hidden() {
        assert!(is_hidden_name(OsStr::new(".cache")));
        assert!(!is_hidden_name(OsStr::new("notes.txt")));
    }
}
