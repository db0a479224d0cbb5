use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;

use super::CliConfig;
use crate::constants::DOWNLOAD_TEMP_DIR;
use crate::core::UpdaterError;
use crate::install::InstallEngine;

/// Finish deletions deferred by a previous update.
///
/// Processes `.delete_on_restart` markers and removes a leftover download
/// directory.
#[derive(Args, Debug)]
pub struct CleanupCommand {
    /// Directory to clean; defaults to the updater's own directory
    dir: Option<PathBuf>,
}

impl CleanupCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let engine = match self.dir {
            Some(dir) => InstallEngine::new(dir),
            None => InstallEngine::for_current_exe()?,
        };
        let dir = engine.base_dir().to_path_buf();

        let deleted = engine.delete_marked_files(&dir).await?;

        let download_dir = dir.join(DOWNLOAD_TEMP_DIR);
        let removed_download_dir = match tokio::fs::remove_dir_all(&download_dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(UpdaterError::file_system("remove directory", &download_dir, &e).into());
            }
        };
        debug!("Removed download directory: {}", removed_download_dir);

        if !cli.quiet {
            println!(
                "{} Removed {} deferred file{}{}",
                "✓".green(),
                deleted,
                if deleted == 1 { "" } else { "s" },
                if removed_download_dir {
                    " and the leftover download directory"
                } else {
                    ""
                }
            );
        }
        Ok(())
    }
}
