//! Terminal progress indicators.
//!
//! [`ProgressBar`] wraps an `indicatif` bar with the updater's styling. Bars
//! are hidden when the caller asks for it (`--no-progress`, `--quiet`) or
//! when `APP_UPDATER_NO_PROGRESS` is set, so scripted runs get clean output.
//!
//! Download bars are driven by the engine's throttled
//! [`DownloadProgress`](crate::download::DownloadProgress) snapshots:
//!
//! ```rust
//! use app_updater::utils::progress::ProgressBar;
//!
//! let bar = ProgressBar::new_download(true);
//! let callback = bar.download_callback();
//! // engine.download(url, dest, Some(callback)).await?;
//! bar.finish_with_message("done");
//! ```

use crate::download::{DownloadProgress, ProgressCallback};
use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable that hides every progress indicator.
pub const NO_PROGRESS_ENV: &str = "APP_UPDATER_NO_PROGRESS";

fn is_progress_disabled() -> bool {
    std::env::var_os(NO_PROGRESS_ENV).is_some()
}

/// A styled progress bar or spinner.
#[derive(Clone, Debug)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// A byte-count bar for a download. The length is learned from the
    /// first progress snapshot that carries a total.
    #[must_use]
    pub fn new_download(hidden: bool) -> Self {
        let bar = if hidden || is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new(0);
            bar.set_style(download_style());
            bar.set_prefix("Downloading");
            bar
        };
        Self { inner: bar }
    }

    /// A spinner for steps of unknown length.
    #[must_use]
    pub fn new_spinner(hidden: bool) -> Self {
        let bar = if hidden || is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self { inner: bar }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    /// Apply one download snapshot.
    pub fn update(&self, progress: &DownloadProgress) {
        if let Some(total) = progress.total_bytes {
            if self.inner.length() != Some(total) {
                self.inner.set_length(total);
            }
        }
        self.inner.set_position(progress.bytes_downloaded);
    }

    /// A callback feeding engine snapshots into this bar.
    #[must_use]
    pub fn download_callback(&self) -> ProgressCallback {
        let bar = self.clone();
        Arc::new(move |progress: DownloadProgress| bar.update(&progress))
    }

    pub fn finish_with_message(&self, msg: impl Into<String>) {
        self.inner.finish_with_message(msg.into());
    }

    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }

    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.inner.is_hidden()
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    #[must_use]
    pub fn length(&self) -> Option<u64> {
        self.inner.length()
    }
}

fn download_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template(
            "{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta})",
        )
        .unwrap_or_else(|_| IndicatifStyle::default_bar())
        .progress_chars("━╸━")
}

fn spinner_style() -> IndicatifStyle {
    IndicatifStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| IndicatifStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}
