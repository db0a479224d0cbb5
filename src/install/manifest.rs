//! The optional `changes.json` change manifest.

use crate::core::UpdaterError;
use crate::utils::path_validation::clean_relative_path;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Relative paths an update adds, modifies and deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesManifest {
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
}

impl ChangesManifest {
    /// True when the manifest names no paths at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty() && self.modified.is_empty()
    }

    /// Paths that must be backed up before mutation: modified then deleted.
    pub fn backup_paths(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().chain(&self.deleted).map(String::as_str)
    }

    /// Paths copied from the payload: added then modified.
    pub fn copy_paths(&self) -> impl Iterator<Item = &str> {
        self.added.iter().chain(&self.modified).map(String::as_str)
    }

    /// Reject any path that is absolute or climbs out of the install root.
    pub fn validate(&self) -> Result<(), UpdaterError> {
        for raw in self.deleted.iter().chain(&self.added).chain(&self.modified) {
            clean_relative_path(raw)?;
        }
        Ok(())
    }
}

/// Load a change manifest.
///
/// A missing file yields an empty manifest. Unreadable files, malformed JSON
/// and unsafe paths are [`UpdaterError::Manifest`] errors.
pub async fn process_changes(manifest_path: &Path) -> Result<ChangesManifest> {
    let manifest_error = |reason: String| UpdaterError::Manifest {
        path: manifest_path.display().to_string(),
        reason,
    };

    let content = match tokio::fs::read_to_string(manifest_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No change manifest at {:?}", manifest_path);
            return Ok(ChangesManifest::default());
        }
        Err(e) => return Err(manifest_error(e.to_string()).into()),
    };

    let manifest: ChangesManifest =
        serde_json::from_str(&content).map_err(|e| manifest_error(e.to_string()))?;
    manifest
        .validate()
        .map_err(|e| manifest_error(e.to_string()))?;

    debug!(
        "Change manifest: {} added, {} modified, {} deleted",
        manifest.added.len(),
        manifest.modified.len(),
        manifest.deleted.len()
    );
    Ok(manifest)
}
