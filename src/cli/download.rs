use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use super::CliConfig;
use crate::constants::DEFAULT_USER_AGENT;
use crate::download::{DownloadEngine, MultiThreadConfig};
use crate::utils::format_bytes;
use crate::utils::progress::ProgressBar;

/// Download one file with the download engine.
#[derive(Args, Debug)]
pub struct DownloadCommand {
    /// URL to fetch
    url: String,

    /// Destination file
    dest: PathBuf,

    /// Continue from the bytes already in DEST
    #[arg(long, conflicts_with = "threads")]
    resume: bool,

    /// Fetch in this many concurrent byte ranges
    #[arg(long)]
    threads: Option<i32>,

    /// Expected SHA-256 of the finished file
    #[arg(long)]
    sha256: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl DownloadCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let engine = DownloadEngine::new(DEFAULT_USER_AGENT)?;
        if let Some(secs) = self.timeout {
            engine.set_timeout(Duration::from_secs(secs));
        }

        let bar = ProgressBar::new_download(cli.hide_progress());
        let callback = Some(bar.download_callback());
        let result = match self.threads {
            _ if self.resume => {
                engine
                    .download_with_resume(&self.url, &self.dest, callback)
                    .await
            }
            Some(threads) if threads > 1 => {
                let config = MultiThreadConfig {
                    thread_count: threads,
                    ..MultiThreadConfig::default()
                };
                engine
                    .download_multi_threaded(&self.url, &self.dest, &config, callback)
                    .await
            }
            _ => engine.download(&self.url, &self.dest, callback).await,
        };
        bar.finish_and_clear();
        result?;

        if let Some(expected) = &self.sha256 {
            engine.validate_checksum(&self.dest, expected).await?;
        }

        if !cli.quiet {
            let size = tokio::fs::metadata(&self.dest).await.map(|m| m.len()).unwrap_or(0);
            println!(
                "{} Saved {} ({})",
                "✓".green(),
                self.dest.display(),
                format_bytes(size)
            );
        }
        Ok(())
    }
}
