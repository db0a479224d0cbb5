//! Path validation and security utilities.
//!
//! Archive entry names and manifest paths come from the update payload and
//! are untrusted. Everything here works lexically: nothing touches the file
//! system, so a path can be rejected before any byte is written.

use crate::core::UpdaterError;
use std::path::{Component, Path, PathBuf};

/// Lexically clean an untrusted relative path.
///
/// Backslashes are treated as separators, `.` segments are dropped and `..`
/// segments cancel the preceding segment. The result is rejected when it is
/// empty, absolute, carries a drive prefix, or still contains a `..` segment
/// after cleaning (i.e. it would climb out of the root it is joined to).
///
/// # Examples
///
/// ```rust
/// use app_updater::utils::path_validation::clean_relative_path;
/// use std::path::PathBuf;
///
/// assert_eq!(clean_relative_path("a/./b/../c.txt").unwrap(), PathBuf::from("a/c.txt"));
/// assert!(clean_relative_path("../escape.txt").is_err());
/// assert!(clean_relative_path("/etc/passwd").is_err());
/// ```
pub fn clean_relative_path(raw: &str) -> Result<PathBuf, UpdaterError> {
    let traversal = || UpdaterError::PathTraversal {
        entry: raw.to_string(),
    };

    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return Err(traversal());
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(traversal());
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(traversal());
    }

    Ok(segments.iter().collect())
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Reject paths containing `..`, a root or a prefix component.
pub fn validate_no_traversal(path: &Path) -> Result<(), UpdaterError> {
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(UpdaterError::PathTraversal {
                    entry: path.display().to_string(),
                });
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}
