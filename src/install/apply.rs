//! Manifest-driven file replacement with backup and rollback.
//!
//! An apply attempt is a small transaction over the install root:
//!
//! 1. Every existing file named in `modified` or `deleted` is copied into a
//!    process-scoped backup directory `<target>/.backup_<pid>`, keeping its
//!    relative path.
//! 2. `deleted` paths are removed, then `added` and `modified` paths are
//!    copied from the payload. Files and directories the attempt creates are
//!    remembered.
//! 3. On failure the backup is copied back over the target and the newly
//!    created files and directories are removed. A failed restore is reported together with
//!    the original failure and the backup directory is kept for manual
//!    recovery.
//! 4. On success the backup directory is removed; failing to remove it only
//!    logs a warning.

use crate::constants::BACKUP_DIR_PREFIX;
use crate::core::UpdaterError;
use crate::install::manifest::ChangesManifest;
use crate::utils::fs::{copy_file_with_dirs, path_exists, remove_file_if_exists};
use crate::utils::path_validation::clean_relative_path;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Backup directory used by this process for `target_root`.
#[must_use]
pub fn backup_dir_for(target_root: &Path) -> PathBuf {
    target_root.join(format!("{BACKUP_DIR_PREFIX}{}", std::process::id()))
}

/// Apply `manifest` from `source_root` onto `target_root`.
///
/// # Errors
///
/// - [`UpdaterError::Manifest`] for unsafe manifest paths (nothing touched)
/// - [`UpdaterError::FileSystem`] when the backup cannot be taken (nothing touched)
/// - [`UpdaterError::RolledBack`] when applying failed and the target was restored
/// - [`UpdaterError::Rollback`] when applying failed and restoring failed as well
///
/// The returned future must be driven to completion: dropping it part way
/// skips the rollback.
pub async fn apply_update(
    source_root: &Path,
    target_root: &Path,
    manifest: &ChangesManifest,
) -> Result<()> {
    manifest.validate().map_err(|e| UpdaterError::Manifest {
        path: source_root.display().to_string(),
        reason: e.to_string(),
    })?;

    let backup_dir = backup_dir_for(target_root);
    info!(
        "Applying update from {:?} to {:?} ({} added, {} modified, {} deleted)",
        source_root,
        target_root,
        manifest.added.len(),
        manifest.modified.len(),
        manifest.deleted.len()
    );

    if let Err(e) = backup_files(target_root, &backup_dir, manifest).await {
        remove_backup(&backup_dir).await;
        return Err(e);
    }

    let mut created = Created::default();
    match apply_files(source_root, target_root, manifest, &mut created).await {
        Ok(()) => {
            remove_backup(&backup_dir).await;
            info!("Update applied to {:?}", target_root);
            Ok(())
        }
        Err(cause) => {
            warn!("Applying update failed, rolling back: {:#}", cause);
            match rollback(target_root, &backup_dir, &created).await {
                Ok(()) => {
                    remove_backup(&backup_dir).await;
                    info!("Rollback completed");
                    Err(UpdaterError::RolledBack {
                        cause: format!("{cause:#}"),
                    }
                    .into())
                }
                Err(rollback_error) => Err(UpdaterError::Rollback {
                    cause: format!("{cause:#}"),
                    rollback: rollback_error,
                }
                .into()),
            }
        }
    }
}

async fn backup_files(
    target_root: &Path,
    backup_dir: &Path,
    manifest: &ChangesManifest,
) -> Result<()> {
    if path_exists(backup_dir).await {
        fs::remove_dir_all(backup_dir)
            .await
            .map_err(|e| UpdaterError::file_system("remove stale backup", backup_dir, &e))?;
    }
    fs::create_dir_all(backup_dir)
        .await
        .map_err(|e| UpdaterError::file_system("create backup directory", backup_dir, &e))?;

    for raw in manifest.backup_paths() {
        let relative = clean_relative_path(raw)?;
        let original = target_root.join(&relative);
        match fs::metadata(&original).await {
            Ok(metadata) if metadata.is_file() => {
                copy_file_with_dirs(&original, &backup_dir.join(&relative)).await?;
                debug!("Backed up {}", relative.display());
            }
            _ => debug!("Nothing to back up for {}", relative.display()),
        }
    }
    Ok(())
}

/// Paths that did not exist before the attempt, in creation order.
#[derive(Debug, Default)]
struct Created {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl Created {
    /// Record the missing ancestors of `target` below `root`, outermost first.
    async fn note_missing_dirs(&mut self, root: &Path, target: &Path) {
        let mut missing = Vec::new();
        let mut current = target.parent();
        while let Some(dir) = current {
            if dir == root || !dir.starts_with(root) || path_exists(dir).await {
                break;
            }
            missing.push(dir.to_path_buf());
            current = dir.parent();
        }
        self.dirs.extend(missing.into_iter().rev());
    }
}

async fn apply_files(
    source_root: &Path,
    target_root: &Path,
    manifest: &ChangesManifest,
    created: &mut Created,
) -> Result<()> {
    for raw in &manifest.deleted {
        let target = target_root.join(clean_relative_path(raw)?);
        if remove_file_if_exists(&target).await? {
            debug!("Deleted {:?}", target);
        }
    }

    for raw in manifest.copy_paths() {
        let relative = clean_relative_path(raw)?;
        let source = source_root.join(&relative);
        if !path_exists(&source).await {
            debug!("Payload has no {}, skipping", relative.display());
            continue;
        }

        let target = target_root.join(&relative);
        if !path_exists(&target).await {
            created.note_missing_dirs(target_root, &target).await;
            created.files.push(target.clone());
        }
        copy_file_with_dirs(&source, &target).await?;
        debug!("Installed {}", relative.display());
    }
    Ok(())
}

/// Restore every backed-up file and remove what the attempt created.
///
/// Keeps going after individual failures and returns them joined.
async fn rollback(
    target_root: &Path,
    backup_dir: &Path,
    created: &Created,
) -> std::result::Result<(), String> {
    let mut failures = Vec::new();

    for path in &created.files {
        if let Err(e) = remove_file_if_exists(path).await {
            failures.push(format!("{e:#}"));
        }
    }
    for dir in created.dirs.iter().rev() {
        match fs::remove_dir(dir).await {
            Ok(()) => debug!("Removed created directory {:?}", dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => failures.push(format!("remove directory {}: {e}", dir.display())),
        }
    }

    for entry in WalkDir::new(backup_dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                failures.push(format!("walk backup: {e}"));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(backup_dir) else {
            continue;
        };
        if let Err(e) = copy_file_with_dirs(entry.path(), &target_root.join(relative)).await {
            failures.push(format!("{e:#}"));
        } else {
            debug!("Restored {}", relative.display());
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; "))
    }
}

async fn remove_backup(backup_dir: &Path) {
    match fs::remove_dir_all(backup_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove backup directory {:?}: {}", backup_dir, e),
    }
}
