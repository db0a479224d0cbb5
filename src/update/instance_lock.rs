//! Single-instance guard for the updater process.
//!
//! The lock is an exclusive OS file lock (via `fs4`) on
//! `<lock_dir>/<name>.lock`. It is taken without waiting: a second updater
//! fails immediately instead of queueing behind the first. The lock is
//! released, and the lock file removed, when the guard is dropped.
//!
//! # Async Safety
//!
//! Opening and locking the file run under `spawn_blocking`.

use crate::core::UpdaterError;
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Held for as long as this process is the only updater.
#[derive(Debug)]
pub struct InstanceLock {
    /// The lock is released when this handle is dropped
    _file: Arc<File>,
    lock_path: PathBuf,
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        debug!(lock = %self.lock_path.display(), "Instance lock released");
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(lock = %self.lock_path.display(), error = %e, "Failed to remove lock file");
            }
        }
    }
}

impl InstanceLock {
    /// Take the lock named `name` in the system temp directory.
    pub async fn acquire(name: &str) -> Result<Self> {
        Self::acquire_in(&std::env::temp_dir(), name).await
    }

    /// Take the lock named `name` in `lock_dir`.
    ///
    /// # Errors
    ///
    /// [`UpdaterError::AlreadyRunning`] when another process holds it.
    pub async fn acquire_in(lock_dir: &Path, name: &str) -> Result<Self> {
        tokio::fs::create_dir_all(lock_dir)
            .await
            .map_err(|e| UpdaterError::file_system("create lock directory", lock_dir, &e))?;
        let lock_path = lock_dir.join(format!("{name}.lock"));

        let path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| UpdaterError::file_system("open lock file", &path, &e))
        })
        .await
        .context("Lock file task failed")??;
        let file = Arc::new(file);

        let locking = file.clone();
        let acquired = tokio::task::spawn_blocking(move || locking.try_lock_exclusive())
            .await
            .context("Lock task failed")?
            .map_err(|e| UpdaterError::file_system("lock", &lock_path, &e))?;

        if !acquired {
            return Err(UpdaterError::AlreadyRunning {
                lock_path: lock_path.display().to_string(),
            }
            .into());
        }

        debug!(lock = %lock_path.display(), "Instance lock acquired");
        Ok(Self {
            _file: file,
            lock_path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}
