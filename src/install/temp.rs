//! Arena of temporary directories owned by the install engine.

use crate::constants::TEMP_DIR_PREFIX;
use crate::core::UpdaterError;
use anyhow::Result;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Opaque handle to a directory created by [`TempDirArena::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempDirHandle(u64);

/// A tracked temporary directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedDir {
    pub handle: TempDirHandle,
    pub path: PathBuf,
}

/// Tracks every temporary directory it creates until it is cleaned up.
///
/// Safe to share between tasks: creation and cleanup only touch one map
/// entry each. Cleaning up a handle that is no longer tracked, or whose
/// directory is already gone, is a no-op.
#[derive(Debug, Default)]
pub struct TempDirArena {
    dirs: DashMap<TempDirHandle, PathBuf>,
    next: AtomicU64,
}

impl TempDirArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh directory under the system temp directory.
    pub fn create(&self) -> Result<TrackedDir> {
        let dir = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir()
            .map_err(|e| UpdaterError::file_system("create temp directory in", &std::env::temp_dir(), &e))?;
        let path = dir.keep();

        let handle = TempDirHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.dirs.insert(handle, path.clone());
        debug!("Created temp directory {:?}", path);
        Ok(TrackedDir { handle, path })
    }

    /// Path of a tracked directory.
    #[must_use]
    pub fn path(&self, handle: TempDirHandle) -> Option<PathBuf> {
        self.dirs.get(&handle).map(|entry| entry.value().clone())
    }

    /// Number of directories still tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Remove one directory and stop tracking it.
    ///
    /// A directory that fails to be removed stays tracked so a later
    /// [`cleanup_all`](Self::cleanup_all) can retry it.
    pub async fn cleanup(&self, handle: TempDirHandle) -> Result<()> {
        let Some((handle, path)) = self.dirs.remove(&handle) else {
            return Ok(());
        };

        if let Err(e) = remove_dir_tolerant(&path).await {
            self.dirs.insert(handle, path);
            return Err(e);
        }
        debug!("Removed temp directory {:?}", path);
        Ok(())
    }

    /// Remove every tracked directory, attempting all of them before
    /// reporting the failures together.
    pub async fn cleanup_all(&self) -> Result<()> {
        let mut handles: Vec<TempDirHandle> = self.dirs.iter().map(|entry| *entry.key()).collect();
        handles.sort();

        let mut failures = Vec::new();
        for handle in handles {
            if let Err(e) = self.cleanup(handle).await {
                warn!("Failed to clean up temp directory: {:#}", e);
                failures.push(format!("{e:#}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(UpdaterError::FileSystem {
                operation: "clean up temp directories".to_string(),
                path: std::env::temp_dir().display().to_string(),
                reason: failures.join("; "),
            }
            .into())
        }
    }
}

async fn remove_dir_tolerant(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpdaterError::file_system("remove directory", path, &e).into()),
    }
}
