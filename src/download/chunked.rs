//! Multi-threaded chunked downloads.
//!
//! The resource is split into contiguous byte ranges with inclusive ends
//! (`Range: bytes=start-end`). Each worker streams one range into a private
//! file inside a temporary `.chunks_*` directory next to the destination; only
//! the merge step writes the destination, concatenating chunk files strictly
//! in index order. The directory guard removes leftover chunk files on every
//! exit path, including cancellation.

use super::DownloadEngine;
use super::progress::{ProgressCallback, ProgressReporter};
use super::stream::content_range_start;
use crate::constants::{DEFAULT_THREAD_COUNT, WRITE_BUFFER_SIZE};
use crate::core::UpdaterError;
use crate::utils::fs::remove_file_if_exists;
use anyhow::{Result, anyhow};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap, RANGE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Tuning for [`DownloadEngine::download_multi_threaded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiThreadConfig {
    /// Concurrent workers; zero or negative means the default of 4.
    pub thread_count: i32,
    /// Bytes per chunk; zero splits the resource into `thread_count` chunks.
    pub chunk_size: u64,
}

impl Default for MultiThreadConfig {
    fn default() -> Self {
        Self {
            thread_count: DEFAULT_THREAD_COUNT as i32,
            chunk_size: 0,
        }
    }
}

impl MultiThreadConfig {
    /// Worker count after applying the default.
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        usize::try_from(self.thread_count)
            .ok()
            .filter(|threads| *threads > 0)
            .unwrap_or(DEFAULT_THREAD_COUNT)
    }
}

/// A contiguous byte range `start..=end` of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
}

impl Chunk {
    /// Number of bytes in the range.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    fn file_name(&self) -> String {
        format!("chunk_{:04}", self.index)
    }
}

/// Split `0..total` into chunks.
///
/// Without a chunk size the resource is divided into `thread_count` chunks
/// (never more chunks than bytes) and the last chunk absorbs the remainder of
/// the integer division. With a chunk size every chunk but the last is
/// exactly that long.
///
/// ```
/// use app_updater::download::{MultiThreadConfig, plan_chunks};
///
/// let chunks = plan_chunks(10, &MultiThreadConfig { thread_count: 3, chunk_size: 0 });
/// let bounds: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
/// assert_eq!(bounds, [(0, 2), (3, 5), (6, 9)]);
/// ```
#[must_use]
pub fn plan_chunks(total: u64, config: &MultiThreadConfig) -> Vec<Chunk> {
    if total == 0 {
        return Vec::new();
    }

    let (count, block) = if config.chunk_size > 0 {
        (total.div_ceil(config.chunk_size), config.chunk_size)
    } else {
        let count = (config.effective_threads() as u64).min(total);
        (count, total / count)
    };

    (0..count)
        .map(|i| Chunk {
            index: i as usize,
            start: i * block,
            end: if i == count - 1 { total - 1 } else { (i + 1) * block - 1 },
        })
        .collect()
}

fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn accepts_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_RANGES)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
}

pub(super) async fn download_multi_threaded(
    engine: &DownloadEngine,
    url: &str,
    dest: &Path,
    config: &MultiThreadConfig,
    on_progress: Option<ProgressCallback>,
) -> Result<()> {
    let head = engine
        .client()
        .head(url)
        .timeout(engine.timeout())
        .send()
        .await
        .map_err(|e| UpdaterError::from_reqwest(url, &e))?;

    // HEAD bodies are empty, so the length comes from the header itself.
    let total = header_u64(head.headers(), CONTENT_LENGTH).filter(|total| *total > 0);
    let ranged = accepts_byte_ranges(head.headers());
    let total = match total {
        Some(total) if head.status().is_success() && ranged => total,
        _ => {
            debug!(
                "{} does not support ranged downloads (status {}, length {:?}, ranges {}), using a single stream",
                url,
                head.status(),
                total,
                ranged
            );
            return engine.download(url, dest, on_progress).await;
        }
    };

    let chunks = plan_chunks(total, config);
    info!(
        "Downloading {} ({} bytes) in {} chunks with {} workers",
        url,
        total,
        chunks.len(),
        config.effective_threads()
    );

    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent)
        .await
        .map_err(|e| UpdaterError::file_system("create directory", &parent, &e))?;
    let work_dir = tempfile::Builder::new()
        .prefix(".chunks_")
        .tempdir_in(&parent)
        .map_err(|e| UpdaterError::file_system("create chunk directory in", &parent, &e))?;

    let reporter = Arc::new(Mutex::new(ProgressReporter::new(on_progress, 0, Some(total))));
    let permits = Arc::new(Semaphore::new(config.effective_threads()));
    let mut workers = JoinSet::new();

    for chunk in chunks.iter().copied() {
        let engine = engine.clone();
        let url = url.to_string();
        let path = work_dir.path().join(chunk.file_name());
        let reporter = reporter.clone();
        let permits = permits.clone();
        workers.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| anyhow!("Chunk worker pool closed: {e}"))?;
            fetch_chunk(&engine, &url, chunk, &path, &reporter).await
        });
    }

    while let Some(joined) = workers.join_next().await {
        let outcome = joined
            .map_err(|e| anyhow!("Chunk worker failed to complete: {e}"))
            .and_then(|result| result);
        if let Err(e) = outcome {
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            return Err(e);
        }
    }

    if let Err(e) = merge_chunks(&chunks, work_dir.path(), dest).await {
        let _ = remove_file_if_exists(dest).await;
        return Err(e);
    }

    reporter.lock().await.finish();
    debug!("Merged {} chunks into {:?}", chunks.len(), dest);
    Ok(())
}

async fn fetch_chunk(
    engine: &DownloadEngine,
    url: &str,
    chunk: Chunk,
    path: &Path,
    reporter: &Mutex<ProgressReporter>,
) -> Result<()> {
    let mut response = engine
        .client()
        .get(url)
        .timeout(engine.timeout())
        .header(RANGE, chunk.range_header())
        .send()
        .await
        .map_err(|e| UpdaterError::from_reqwest(url, &e))?;

    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT {
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
    if content_range_start(response.headers()) != Some(chunk.start) {
        return Err(UpdaterError::RangeNotHonored {
            url: url.to_string(),
        }
        .into());
    }

    let file = File::create(path)
        .await
        .map_err(|e| UpdaterError::file_system("create chunk file", path, &e))?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    let mut received = 0u64;
    while let Some(bytes) = response
        .chunk()
        .await
        .map_err(|e| UpdaterError::from_reqwest(url, &e))?
    {
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| UpdaterError::file_system("write chunk file", path, &e))?;
        received += bytes.len() as u64;
        reporter.lock().await.advance(bytes.len() as u64);
    }
    writer
        .flush()
        .await
        .map_err(|e| UpdaterError::file_system("flush chunk file", path, &e))?;

    if received != chunk.size() {
        return Err(UpdaterError::IncompleteTransfer {
            url: url.to_string(),
            expected: chunk.size(),
            received,
        }
        .into());
    }

    debug!("Chunk {} ({}) complete", chunk.index, chunk.range_header());
    Ok(())
}

async fn merge_chunks(chunks: &[Chunk], work_dir: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)
        .await
        .map_err(|e| UpdaterError::file_system("create", dest, &e))?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    for chunk in chunks {
        let path = work_dir.join(chunk.file_name());
        let mut part = File::open(&path)
            .await
            .map_err(|e| UpdaterError::file_system("open chunk file", &path, &e))?;
        tokio::io::copy(&mut part, &mut writer)
            .await
            .map_err(|e| UpdaterError::file_system("merge chunk into", dest, &e))?;
        drop(part);
        remove_file_if_exists(&path).await?;
    }

    writer
        .flush()
        .await
        .map_err(|e| UpdaterError::file_system("flush", dest, &e))?;
    Ok(())
}
