//! ZIP extraction with entry-name validation.
//!
//! Every entry name is cleaned and checked before the first byte is written;
//! a single entry that would land outside the destination aborts the whole
//! extraction. Directory modes are applied last, deepest first, so a
//! read-only directory entry cannot block the files extracted into it.

use crate::core::UpdaterError;
use crate::utils::path_validation::clean_relative_path;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

fn archive_error(path: &Path, reason: impl ToString) -> UpdaterError {
    UpdaterError::Archive {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Extract `archive_path` into `dest_root`, returning the number of entries.
pub async fn extract_zip(archive_path: &Path, dest_root: &Path) -> Result<usize> {
    let archive_path = archive_path.to_path_buf();
    let dest_root = dest_root.to_path_buf();

    tokio::task::spawn_blocking(move || extract_blocking(&archive_path, &dest_root))
        .await
        .context("Archive extraction task failed")?
}

fn extract_blocking(archive_path: &Path, dest_root: &Path) -> Result<usize> {
    info!("Extracting {:?} to {:?}", archive_path, dest_root);

    let file = File::open(archive_path)
        .map_err(|e| UpdaterError::file_system("open archive", archive_path, &e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| archive_error(archive_path, e))?;

    let mut plan: Vec<(PathBuf, bool, Option<u32>)> = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| archive_error(archive_path, e))?;
        let relative = clean_relative_path(entry.name())?;
        plan.push((relative, entry.is_dir(), entry.unix_mode()));
    }

    fs::create_dir_all(dest_root)
        .map_err(|e| UpdaterError::file_system("create directory", dest_root, &e))?;

    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();
    for (index, (relative, is_dir, mode)) in plan.iter().enumerate() {
        let target = dest_root.join(relative);

        if *is_dir {
            fs::create_dir_all(&target)
                .map_err(|e| UpdaterError::file_system("create directory", &target, &e))?;
            if let Some(mode) = mode {
                dir_modes.push((target, *mode));
            }
            debug!("Extracted {}", relative.display());
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| UpdaterError::file_system("create directory", parent, &e))?;
        }
        let mut entry = archive
            .by_index(index)
            .map_err(|e| archive_error(archive_path, e))?;
        let mut out = File::create(&target)
            .map_err(|e| UpdaterError::file_system("create", &target, &e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                archive_error(archive_path, e)
            } else {
                UpdaterError::file_system("write", &target, &e)
            }
        })?;

        apply_mode(&target, *mode)?;
        debug!("Extracted {}", relative.display());
    }

    dir_modes.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
    for (target, mode) in &dir_modes {
        apply_mode(target, Some(*mode))?;
    }

    Ok(plan.len())
}

#[cfg(unix)]
fn apply_mode(target: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode.map(|m| m & 0o7777).filter(|m| *m != 0) {
        fs::set_permissions(target, fs::Permissions::from_mode(mode))
            .map_err(|e| UpdaterError::file_system("set permissions on", target, &e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_target: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}
