//! Files held open by a running process.
//!
//! A running executable usually cannot be overwritten in place. The install
//! engine moves it aside to `<name>.old`; when even the rename is refused
//! because the file is locked, it writes a `<name>.delete_on_restart` marker
//! holding the target path, and the next startup deletes the target with
//! [`delete_marked_files`].

use crate::constants::{DELETE_MARKER_SUFFIX, OLD_FILE_SUFFIX};
use crate::core::UpdaterError;
use crate::utils::fs::{path_exists, remove_file_if_exists};
use anyhow::Result;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// What [`handle_running_process`] did with a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunningFileOutcome {
    /// The file does not exist.
    NotPresent,
    /// The file was renamed out of the way.
    Renamed { old_path: PathBuf },
    /// The file is locked; a deletion marker was written next to it.
    MarkedForDeletion { marker: PathBuf },
}

#[cfg(windows)]
const LOCKED_OS_CODES: &[i32] = &[
    32, // ERROR_SHARING_VIOLATION
    5,  // ERROR_ACCESS_DENIED
];

#[cfg(unix)]
const LOCKED_OS_CODES: &[i32] = &[
    26, // ETXTBSY
    16, // EBUSY
];

#[cfg(not(any(unix, windows)))]
const LOCKED_OS_CODES: &[i32] = &[];

/// Whether `error` means the file is open or locked by another process.
///
/// Checks the platform's sharing-violation error codes first and falls back
/// to matching the message text.
#[must_use]
pub fn is_resource_locked(error: &io::Error) -> bool {
    if error
        .raw_os_error()
        .is_some_and(|code| LOCKED_OS_CODES.contains(&code))
    {
        return true;
    }

    let message = error.to_string().to_ascii_lowercase();
    message.contains("being used by another process") || message.contains("access is denied")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Move `base_dir/file_name` aside so the update can replace it.
///
/// A stale `.old` file from a previous run is removed first.
pub async fn handle_running_process(base_dir: &Path, file_name: &str) -> Result<RunningFileOutcome> {
    let target = base_dir.join(file_name);
    if !path_exists(&target).await {
        return Ok(RunningFileOutcome::NotPresent);
    }

    let old_path = with_suffix(&target, OLD_FILE_SUFFIX);
    remove_file_if_exists(&old_path).await?;

    match fs::rename(&target, &old_path).await {
        Ok(()) => {
            info!("Renamed {:?} to {:?}", target, old_path);
            Ok(RunningFileOutcome::Renamed { old_path })
        }
        Err(e) => resolve_rename_failure(&target, &e).await,
    }
}

async fn resolve_rename_failure(target: &Path, error: &io::Error) -> Result<RunningFileOutcome> {
    if !is_resource_locked(error) {
        return Err(UpdaterError::file_system("rename", target, error).into());
    }

    warn!("{:?} is in use, deferring deletion to next start: {}", target, error);
    let marker = with_suffix(target, DELETE_MARKER_SUFFIX);
    fs::write(&marker, target.display().to_string())
        .await
        .map_err(|e| UpdaterError::file_system("write deletion marker", &marker, &e))?;
    Ok(RunningFileOutcome::MarkedForDeletion { marker })
}

/// Process every `*.delete_on_restart` marker directly inside `directory`.
///
/// Deletes the target named by each marker (an already missing target is
/// fine), then the marker itself. Failures are collected and reported
/// together after the whole directory has been scanned. Returns the number
/// of markers removed.
pub async fn delete_marked_files(directory: &Path) -> Result<usize> {
    let pattern = glob::Pattern::new(&format!("*{DELETE_MARKER_SUFFIX}"))
        .map_err(|e| anyhow::anyhow!("Invalid marker pattern: {e}"))?;

    let mut entries = match fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(UpdaterError::file_system("read directory", directory, &e).into()),
    };

    let mut markers = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| UpdaterError::file_system("read directory", directory, &e))?
    {
        if pattern.matches(&entry.file_name().to_string_lossy()) {
            markers.push(entry.path());
        }
    }
    markers.sort();

    let mut removed = 0;
    let mut failures = Vec::new();
    for marker in markers {
        let recorded = match fs::read_to_string(&marker).await {
            Ok(recorded) => recorded,
            Err(e) => {
                failures.push(format!("read marker {}: {e}", marker.display()));
                continue;
            }
        };

        let target = PathBuf::from(recorded.trim());
        let target = if target.is_relative() {
            directory.join(target)
        } else {
            target
        };

        match remove_file_if_exists(&target).await {
            Ok(true) => info!("Deleted marked file {:?}", target),
            Ok(false) => debug!("Marked file {:?} already gone", target),
            Err(e) => failures.push(format!("{e:#}")),
        }

        match remove_file_if_exists(&marker).await {
            Ok(_) => removed += 1,
            Err(e) => failures.push(format!("{e:#}")),
        }
    }

    if failures.is_empty() {
        Ok(removed)
    } else {
        Err(UpdaterError::FileSystem {
            operation: "delete marked files in".to_string(),
            path: directory.display().to_string(),
            reason: failures.join("; "),
        }
        .into())
    }
}
