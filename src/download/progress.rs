//! Progress reporting for transfer operations.
//!
//! Every transfer operation accepts an optional [`ProgressCallback`] and feeds
//! it [`DownloadProgress`] snapshots through a [`ProgressReporter`], which
//! enforces the emission rules:
//!
//! - at most one snapshot per [`PROGRESS_INTERVAL`] of wall-clock time
//! - exactly one final snapshot when the operation completes, with
//!   `percentage == 100.0`
//! - `bytes_downloaded` never decreases and never exceeds `total_bytes`

use crate::constants::PROGRESS_INTERVAL;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A point-in-time view of a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    /// Bytes present at the destination, including resumed bytes.
    pub bytes_downloaded: u64,
    /// Final size of the destination, when the server announced it.
    pub total_bytes: Option<u64>,
    /// `0.0..=100.0`; stays at `0.0` until completion when the size is unknown.
    pub percentage: f64,
    /// Bytes transferred by this call divided by elapsed seconds.
    pub bytes_per_second: u64,
}

/// Observer invoked with progress snapshots.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Rate-limited producer of [`DownloadProgress`] snapshots for one operation.
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    interval: Duration,
    started: Instant,
    last_emit: Instant,
    start_bytes: u64,
    downloaded: u64,
    total: Option<u64>,
}

impl ProgressReporter {
    /// Start reporting a transfer that already has `start_bytes` on disk.
    pub fn new(callback: Option<ProgressCallback>, start_bytes: u64, total: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            callback,
            interval: PROGRESS_INTERVAL,
            started: now,
            last_emit: now,
            start_bytes,
            downloaded: start_bytes,
            total,
        }
    }

    /// Record `bytes` more bytes and emit a snapshot if the interval elapsed.
    pub fn advance(&mut self, bytes: u64) {
        self.downloaded = self.downloaded.saturating_add(bytes);

        if self.callback.is_none() {
            return;
        }

        let now = Instant::now();
        if now.duration_since(self.last_emit) >= self.interval {
            self.last_emit = now;
            let snapshot = self.snapshot(now, false);
            self.emit(snapshot);
        }
    }

    /// Bytes accounted so far, including resumed bytes.
    #[must_use]
    pub const fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Emit the final snapshot and return it.
    pub fn finish(&mut self) -> DownloadProgress {
        let snapshot = self.snapshot(Instant::now(), true);
        self.emit(snapshot);
        snapshot
    }

    fn snapshot(&self, now: Instant, complete: bool) -> DownloadProgress {
        let elapsed = now.duration_since(self.started).as_secs_f64();
        let transferred = self.downloaded.saturating_sub(self.start_bytes);
        let bytes_per_second = if elapsed > 0.0 {
            (transferred as f64 / elapsed) as u64
        } else {
            0
        };

        let total = self.total.filter(|total| *total > 0);
        let bytes_downloaded = match total {
            Some(total) => self.downloaded.min(total),
            None => self.downloaded,
        };

        let percentage = match (complete, total) {
            (true, _) => 100.0,
            (false, Some(total)) => (bytes_downloaded as f64 / total as f64 * 100.0).min(100.0),
            (false, None) => 0.0,
        };

        DownloadProgress {
            bytes_downloaded,
            total_bytes: self.total,
            percentage,
            bytes_per_second,
        }
    }

    fn emit(&self, snapshot: DownloadProgress) {
        if let Some(callback) = &self.callback {
            callback(snapshot);
        }
    }
}
