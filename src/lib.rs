//! app-updater - self-updating client core
//!
//! The library behind the `app-updater` binary. An application embeds it (or
//! ships the binary next to itself) to check an update service for newer
//! releases, download them robustly and install them transactionally.
//!
//! # Architecture Overview
//!
//! Three layers, each usable on its own:
//!
//! - [`download`] - the download engine: plain, resumable, multi-source and
//!   multi-threaded HTTP downloads with throttled progress and SHA-256
//!   verification
//! - [`install`] - the install engine: a tracked temp-directory arena, safe
//!   ZIP extraction, change manifests applied with backup and rollback, and
//!   handling of files held by running processes
//! - [`update`] - the update state machine driving a session from `Idle`
//!   through `Checking`, `UpdateAvailable`, `Downloading` and `Installing`
//!   to `Completed` or `Error`, with retries and observers
//!
//! Supporting modules:
//!
//! - [`cli`] - the command-line interface
//! - [`config`] - the TOML configuration file
//! - [`constants`] - shared timeouts, sizes and file names
//! - [`core`] - the error taxonomy and user-facing error rendering
//! - [`utils`] - file helpers, path validation, progress bars and retry policy
//! - [`version`] - release versions, channels and the version marker file
//!
//! # Example
//!
//! ```rust,no_run
//! use app_updater::download::DownloadEngine;
//! use app_updater::install::InstallEngine;
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let downloads = DownloadEngine::new("app-updater")?;
//! let dest = Path::new("/tmp/update.zip");
//! downloads.download("https://example.com/app.zip", dest, None).await?;
//!
//! let installer = InstallEngine::new("/opt/app");
//! let staging = installer.create_temp_dir()?;
//! installer.extract_zip(dest, &staging.path).await?;
//! let manifest = installer.process_changes(&staging.path.join("changes.json")).await?;
//! installer.apply_update(&staging.path, Path::new("/opt/app"), &manifest).await?;
//! installer.cleanup_all_temp_dirs().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod download;
pub mod install;
pub mod update;
pub mod utils;
pub mod version;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
