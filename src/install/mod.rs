//! Install engine: safe extraction, manifest-driven replacement with
//! backup/rollback, and handling of files locked by running processes.
//!
//! [`InstallEngine`] bundles the operations with the state they need: the
//! directory that running-process handling resolves names against (the
//! updater's own directory by default) and the arena of temporary
//! directories it has handed out.
//!
//! # Example
//!
//! ```rust,no_run
//! use app_updater::install::InstallEngine;
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = InstallEngine::for_current_exe()?;
//! engine.delete_marked_files(engine.base_dir()).await?;
//!
//! let staging = engine.create_temp_dir()?;
//! engine.extract_zip(Path::new("UPDATE_TEMP/update.zip"), &staging.path).await?;
//! let manifest = engine.process_changes(&staging.path.join("changes.json")).await?;
//! engine.apply_update(&staging.path, Path::new("."), &manifest).await?;
//!
//! engine.cleanup_all_temp_dirs().await?;
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod archive;
pub mod locked;
pub mod manifest;
pub mod temp;

pub use locked::{RunningFileOutcome, is_resource_locked};
pub use manifest::ChangesManifest;
pub use temp::{TempDirArena, TempDirHandle, TrackedDir};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Install engine bound to a base directory.
#[derive(Debug)]
pub struct InstallEngine {
    base_dir: PathBuf,
    temp_dirs: TempDirArena,
}

impl InstallEngine {
    /// Engine whose running-process handling resolves names in `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            temp_dirs: TempDirArena::new(),
        }
    }

    /// Engine bound to the directory of the running executable.
    pub fn for_current_exe() -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the current executable")?;
        let base_dir = exe
            .parent()
            .map(Path::to_path_buf)
            .context("Current executable has no parent directory")?;
        Ok(Self::new(base_dir))
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create and track a temporary directory.
    pub fn create_temp_dir(&self) -> Result<TrackedDir> {
        self.temp_dirs.create()
    }

    /// Remove one tracked directory; unknown handles are a no-op.
    pub async fn cleanup_temp_dir(&self, handle: TempDirHandle) -> Result<()> {
        self.temp_dirs.cleanup(handle).await
    }

    /// Remove every directory this engine still tracks.
    pub async fn cleanup_all_temp_dirs(&self) -> Result<()> {
        self.temp_dirs.cleanup_all().await
    }

    /// Number of temporary directories not yet cleaned up.
    #[must_use]
    pub fn tracked_temp_dirs(&self) -> usize {
        self.temp_dirs.len()
    }

    /// Extract a ZIP archive, rejecting entries that escape `dest_root`.
    pub async fn extract_zip(&self, archive_path: &Path, dest_root: &Path) -> Result<usize> {
        archive::extract_zip(archive_path, dest_root).await
    }

    /// Load `changes.json`; a missing file is an empty manifest.
    pub async fn process_changes(&self, manifest_path: &Path) -> Result<ChangesManifest> {
        manifest::process_changes(manifest_path).await
    }

    /// Apply a manifest as a backup/apply/rollback transaction.
    pub async fn apply_update(
        &self,
        source_root: &Path,
        target_root: &Path,
        manifest: &ChangesManifest,
    ) -> Result<()> {
        apply::apply_update(source_root, target_root, manifest).await
    }

    /// Rename `file_name` (relative to the base directory) out of the way,
    /// or mark it for deletion on next start when it is locked.
    pub async fn handle_running_process(&self, file_name: &str) -> Result<RunningFileOutcome> {
        locked::handle_running_process(&self.base_dir, file_name).await
    }

    /// Delete files recorded by `.delete_on_restart` markers in `directory`.
    pub async fn delete_marked_files(&self, directory: &Path) -> Result<usize> {
        locked::delete_marked_files(directory).await
    }
}
