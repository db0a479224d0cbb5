//! File system helpers shared by the install engine and the CLI.

use crate::core::UpdaterError;
use anyhow::Result;
use std::path::Path;
use tokio::fs;

/// Copy `src` to `dst`, creating the parent directories of `dst`.
///
/// An existing destination is overwritten. Permission bits travel with the
/// copy (`tokio::fs::copy` preserves them).
pub async fn copy_file_with_dirs(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| UpdaterError::file_system("create directory", parent, &e))?;
    }

    fs::copy(src, dst)
        .await
        .map_err(|e| UpdaterError::file_system("copy file to", dst, &e))?;

    Ok(())
}

/// Remove a file, treating "already gone" as success.
///
/// Returns `true` when a file was actually removed.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(UpdaterError::file_system("remove file", path, &e).into()),
    }
}

/// Whether `path` exists, without following errors into a `Result`.
pub async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Human readable byte count: `512 B`, `1.5 KiB`, `3.2 MiB`.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
