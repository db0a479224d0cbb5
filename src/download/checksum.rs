//! SHA-256 verification of downloaded artifacts.

use crate::constants::HASH_BUFFER_SIZE;
use crate::core::UpdaterError;
use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Compute the lower-case hex SHA-256 digest of a file, streaming it in
/// fixed-size blocks.
pub async fn compute_sha256(file_path: &Path) -> Result<String> {
    debug!("Computing SHA256 checksum for: {:?}", file_path);

    let mut file = File::open(file_path)
        .await
        .map_err(|e| UpdaterError::file_system("open for checksum", file_path, &e))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| UpdaterError::file_system("read for checksum", file_path, &e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Normalize a user-supplied digest: trim, lower-case, drop a `sha256:` prefix.
fn normalize_digest(expected: &str) -> String {
    let trimmed = expected.trim();
    let lowered = trimmed.to_ascii_lowercase();
    match lowered.strip_prefix("sha256:") {
        Some(rest) => rest.to_string(),
        None => lowered,
    }
}

/// Verify a file against an expected hex SHA-256 digest.
///
/// An empty `expected` skips validation. The comparison is done on
/// lower-case digests, so upper-case input is accepted.
///
/// # Errors
///
/// - [`UpdaterError::FileSystem`] when the file cannot be opened or read
/// - [`UpdaterError::ChecksumMismatch`] naming both digests on mismatch
pub async fn validate_checksum(file_path: &Path, expected: &str) -> Result<()> {
    let expected = normalize_digest(expected);
    if expected.is_empty() {
        debug!("No checksum supplied for {:?}, skipping validation", file_path);
        return Ok(());
    }

    info!("Verifying checksum for: {:?}", file_path);
    let actual = compute_sha256(file_path).await?;

    if actual != expected {
        return Err(UpdaterError::ChecksumMismatch {
            path: file_path.display().to_string(),
            expected,
            actual,
        }
        .into());
    }

    info!("Checksum verification successful");
    Ok(())
}
