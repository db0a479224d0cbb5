//! Single-stream transfers, fresh and resumed.

use super::DownloadEngine;
use super::progress::{ProgressCallback, ProgressReporter};
use crate::constants::WRITE_BUFFER_SIZE;
use crate::core::UpdaterError;
use anyhow::Result;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, HeaderMap, RANGE};
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// First byte position of a `Content-Range: bytes <start>-<end>/<len>` header.
pub(super) fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let range = value.trim().strip_prefix("bytes ")?;
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

pub(super) async fn fetch_to_file(
    engine: &DownloadEngine,
    url: &str,
    dest: &Path,
    resume: bool,
    on_progress: Option<ProgressCallback>,
) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| UpdaterError::file_system("create directory", parent, &e))?;
    }

    let existing = if resume {
        match fs::metadata(dest).await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => 0,
        }
    } else {
        0
    };

    let mut request = engine.client().get(url).timeout(engine.timeout());
    if existing > 0 {
        debug!("Resuming {} from byte {}", url, existing);
        request = request.header(RANGE, format!("bytes={existing}-"));
    }

    let mut response = request
        .send()
        .await
        .map_err(|e| UpdaterError::from_reqwest(url, &e))?;

    let status = response.status();
    if existing > 0 && status != StatusCode::PARTIAL_CONTENT {
        if status.is_success() {
            return Err(UpdaterError::RangeNotHonored {
                url: url.to_string(),
            }
            .into());
        }
        return Err(UpdaterError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
        .into());
    }
    if !status.is_success() {
        return Err(UpdaterError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
        .into());
    }
    if existing > 0 && content_range_start(response.headers()) != Some(existing) {
        debug!(
            "Expected a range starting at {}, got {:?}",
            existing,
            response.headers().get(CONTENT_RANGE)
        );
        return Err(UpdaterError::RangeNotHonored {
            url: url.to_string(),
        }
        .into());
    }

    let total = response.content_length().map(|remaining| existing + remaining);
    info!("Downloading {} to {:?}", url, dest);

    let file = if existing > 0 {
        OpenOptions::new().append(true).open(dest).await
    } else {
        fs::File::create(dest).await
    }
    .map_err(|e| UpdaterError::file_system("open for writing", dest, &e))?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    let mut reporter = ProgressReporter::new(on_progress, existing, total);
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| UpdaterError::from_reqwest(url, &e))?
    {
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| UpdaterError::file_system("write", dest, &e))?;
        reporter.advance(chunk.len() as u64);
    }

    writer
        .flush()
        .await
        .map_err(|e| UpdaterError::file_system("flush", dest, &e))?;

    let written = reporter.downloaded();
    if let Some(total) = total.filter(|total| written < *total) {
        return Err(UpdaterError::IncompleteTransfer {
            url: url.to_string(),
            expected: total,
            received: written,
        }
        .into());
    }

    reporter.finish();
    debug!("Finished {}: {} bytes", url, written);
    Ok(())
}
