//! Command-line interface for the updater.
//!
//! # Commands
//!
//! - `run` - check for an update and install it
//! - `check` - ask the update service without downloading anything
//! - `download <URL> <DEST>` - fetch a single file (resume, chunks, checksum)
//! - `verify <FILE> <SHA256>` - check a file's SHA-256 digest
//! - `cleanup [DIR]` - finish deletions deferred from a previous update
//!
//! # Global Options
//!
//! - `--verbose` / `-v` - debug logging
//! - `--quiet` / `-q` - errors only, no progress output
//! - `--config` / `-c` - configuration file path
//! - `--no-progress` - hide progress bars
//!
//! Logging goes to stderr through `tracing-subscriber`. The level comes from
//! `--verbose`/`--quiet`, then `RUST_LOG`, then `log_level` in the config file.

mod check;
mod cleanup;
pub mod common;
mod download;
mod run;
mod verify;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::UpdaterConfig;

/// Settings derived from the global flags, handed to every command.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub verbose: bool,
    pub quiet: bool,
    pub no_progress: bool,
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress bars are shown unless suppressed by either flag.
    #[must_use]
    pub const fn hide_progress(&self) -> bool {
        self.no_progress || self.quiet
    }

    /// The log filter for this invocation; `configured` is the config file's level.
    #[must_use]
    pub fn log_filter(&self, configured: Option<&str>) -> EnvFilter {
        if self.quiet {
            return EnvFilter::new("error");
        }
        if self.verbose {
            return EnvFilter::new("app_updater=debug");
        }
        if std::env::var_os("RUST_LOG").is_some() {
            return EnvFilter::from_default_env();
        }
        EnvFilter::new(format!("app_updater={}", configured.unwrap_or("info")))
    }

    /// Install the global subscriber. Later calls are no-ops.
    pub fn init_logging(&self, configured: Option<&str>) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(self.log_filter(configured))
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Load (or create) the updater configuration file.
    pub async fn load_updater_config(&self) -> Result<UpdaterConfig> {
        UpdaterConfig::load_or_create(self.config_path.clone()).await
    }
}

/// Self-updating client.
#[derive(Parser)]
#[command(
    name = "app-updater",
    about = "Check for, download and install application updates",
    version,
    long_about = "Checks an update service for newer releases, downloads them from the fastest \
                  available source and installs them with automatic rollback."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check for an update and install it
    Run(run::RunCommand),

    /// Check for an update without installing it
    Check(check::CheckCommand),

    /// Download a single file
    Download(download::DownloadCommand),

    /// Verify a file's SHA-256 checksum
    Verify(verify::VerifyCommand),

    /// Delete files left behind by a previous update
    Cleanup(cleanup::CleanupCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        CliConfig {
            verbose: self.verbose,
            quiet: self.quiet,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => {
                let updater = config.load_updater_config().await?;
                config.init_logging(Some(&updater.log_level));
                cmd.execute(&config, updater).await
            }
            Commands::Check(cmd) => {
                let updater = config.load_updater_config().await?;
                config.init_logging(Some(&updater.log_level));
                cmd.execute(&config, updater).await
            }
            Commands::Download(cmd) => {
                config.init_logging(None);
                cmd.execute(&config).await
            }
            Commands::Verify(cmd) => {
                config.init_logging(None);
                cmd.execute(&config).await
            }
            Commands::Cleanup(cmd) => {
                config.init_logging(None);
                cmd.execute(&config).await
            }
        }
    }
}
