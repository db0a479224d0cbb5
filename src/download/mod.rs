//! Download engine: single-stream, resumable, multi-source and chunked
//! multi-threaded HTTP transfers with progress and integrity checks.
//!
//! # Operations
//!
//! | Operation | Method |
//! |-----------|--------|
//! | Download | [`DownloadEngine::download`] |
//! | DownloadWithResume | [`DownloadEngine::download_with_resume`] |
//! | DownloadWithSources | [`DownloadEngine::download_with_sources`] |
//! | TestSpeeds | [`DownloadEngine::test_speeds`] |
//! | DownloadMultiThreaded | [`DownloadEngine::download_multi_threaded`] |
//! | ValidateChecksum | [`DownloadEngine::validate_checksum`] |
//! | SetTimeout | [`DownloadEngine::set_timeout`] |
//!
//! # Progress
//!
//! All transfers report through [`progress::ProgressReporter`]: at most one
//! snapshot every 100 ms plus a final snapshot at 100 %.
//!
//! # Cancellation
//!
//! Every operation is an ordinary future. Dropping it aborts in-flight
//! requests; chunk workers are aborted with it and their temporary files are
//! removed by the chunk directory guard. The engine itself never retries.
//!
//! # Example
//!
//! ```rust,no_run
//! use app_updater::download::{DownloadEngine, MultiThreadConfig};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = DownloadEngine::new("my-app-updater/1.0")?;
//! engine.set_timeout(Duration::from_secs(120));
//!
//! let dest = Path::new("/tmp/update.zip");
//! engine
//!     .download_multi_threaded("https://example.com/app.zip", dest, &MultiThreadConfig::default(), None)
//!     .await?;
//! engine.validate_checksum(dest, "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08").await?;
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod chunked;
pub mod progress;
pub mod sources;
mod stream;

pub use chunked::{Chunk, MultiThreadConfig, plan_chunks};
pub use progress::{DownloadProgress, ProgressCallback, ProgressReporter};
pub use sources::{DownloadSource, SpeedTestResult};

use crate::constants::DEFAULT_REQUEST_TIMEOUT;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// HTTP download engine.
///
/// Cloning is cheap: clones share the connection pool and the timeout
/// setting, so a timeout changed through one clone applies to all of them.
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    client: reqwest::Client,
    timeout_ms: Arc<AtomicU64>,
}

impl DownloadEngine {
    /// Build an engine that identifies itself with `user_agent`.
    ///
    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be initialised (e.g. TLS backend).
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            timeout_ms: Arc::new(AtomicU64::new(duration_to_millis(DEFAULT_REQUEST_TIMEOUT))),
        })
    }

    /// Apply `timeout` to every subsequent request, body transfer included.
    pub fn set_timeout(&self, timeout: Duration) {
        debug!("Download timeout set to {:?}", timeout);
        self.timeout_ms.store(duration_to_millis(timeout), Ordering::Relaxed);
    }

    /// The timeout currently applied to requests.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub(crate) const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetch `url` into `dest`, replacing any existing file.
    ///
    /// Parent directories of `dest` are created. Any non-2xx status fails.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<()> {
        stream::fetch_to_file(self, url, dest, false, on_progress).await
    }

    /// Fetch `url` into `dest`, continuing from the bytes already in `dest`.
    ///
    /// With a non-empty `dest`, sends `Range: bytes=<len>-` and appends the
    /// body. A server that answers with anything but `206 Partial Content`
    /// yields [`UpdaterError::RangeNotHonored`](crate::core::UpdaterError::RangeNotHonored)
    /// and the partial file is left untouched; the caller decides whether to
    /// retry with [`download`](Self::download).
    pub async fn download_with_resume(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<()> {
        stream::fetch_to_file(self, url, dest, true, on_progress).await
    }

    /// Try each source in ascending priority order until one succeeds.
    ///
    /// Returns the source that produced `dest`.
    pub async fn download_with_sources(
        &self,
        sources: &[DownloadSource],
        dest: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadSource> {
        sources::download_with_sources(self, sources, dest, on_progress).await
    }

    /// Probe every source concurrently and rank them by throughput.
    pub async fn test_speeds(
        &self,
        sources: &[DownloadSource],
        byte_budget: u64,
        timeout: Duration,
    ) -> Result<Vec<SpeedTestResult>> {
        sources::test_speeds(self, sources, byte_budget, timeout).await
    }

    /// Download `url` in concurrent byte-range chunks, merged in index order.
    ///
    /// Falls back to [`download`](Self::download) when the server does not
    /// announce both a length and `Accept-Ranges: bytes`.
    pub async fn download_multi_threaded(
        &self,
        url: &str,
        dest: &Path,
        config: &MultiThreadConfig,
        on_progress: Option<ProgressCallback>,
    ) -> Result<()> {
        chunked::download_multi_threaded(self, url, dest, config, on_progress).await
    }

    /// Verify `file_path` against a hex SHA-256 digest; empty skips the check.
    pub async fn validate_checksum(&self, file_path: &Path, expected: &str) -> Result<()> {
        checksum::validate_checksum(file_path, expected).await
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
