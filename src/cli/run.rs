//! The `run` command: one full update session.
//!
//! Startup finishes deletions deferred by a previous update, then the
//! session runs under a single-instance lock until it completes or fails.
//! Ctrl-C cancels the session; an install already in progress still
//! finishes or rolls back first. Temporary directories are removed on every
//! exit path.

use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use tracing::{info, warn};

use super::CliConfig;
use super::common::UpdateTarget;
use crate::config::UpdaterConfig;
use crate::download::DownloadEngine;
use crate::install::InstallEngine;
use crate::update::{
    InstanceLock, MirrorClient, StateEvent, UpdateMachine, UpdateOptions, UpdateState,
};
use crate::utils::progress::ProgressBar;

#[derive(Args, Debug)]
pub struct RunCommand {
    #[command(flatten)]
    target: UpdateTarget,
}

impl RunCommand {
    pub async fn execute(self, cli: &CliConfig, config: UpdaterConfig) -> Result<()> {
        let install_root = self.target.install_root(&config)?;
        let _lock = InstanceLock::acquire_in(&install_root, ".app-updater").await?;

        let startup = InstallEngine::new(&install_root);
        match startup.delete_marked_files(&install_root).await {
            Ok(0) => {}
            Ok(count) => info!("Removed {} files left by the previous update", count),
            Err(e) => warn!("Deferred deletions incomplete: {:#}", e),
        }

        let current = self.target.current_version(&config, &install_root).await?;
        let channel = self.target.channel(&config)?;
        let options = UpdateOptions::from_config(&config, install_root.clone(), current, channel);

        let downloads = DownloadEngine::new(&config.user_agent)?;
        downloads.set_timeout(config.download.timeout());
        let checker = MirrorClient::from_config(&config)?;

        let bar = ProgressBar::new_download(cli.hide_progress());
        let mut machine =
            UpdateMachine::new(checker, downloads, options).with_progress(bar.download_callback());
        if !cli.quiet {
            machine.add_observer(Arc::new(print_state));
        }

        let cancellation = machine.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling the update");
                cancellation.cancel();
            }
        });

        let result = machine.run().await;
        interrupt.abort();
        bar.finish_and_clear();

        if let Err(e) = machine.install_engine().cleanup_all_temp_dirs().await {
            warn!("Failed to remove temporary directories: {:#}", e);
        }

        if machine.cancellation_token().is_cancelled() && result.is_err() {
            bail!("Update cancelled by user");
        }
        let session = result?;

        if !cli.quiet {
            match session.new_version().filter(|_| session.installed) {
                Some(version) => println!(
                    "{} Updated {} -> {}",
                    "✓".green(),
                    session.current_version.to_display(),
                    version.to_display().bold()
                ),
                None => println!(
                    "{} {} is up to date",
                    "✓".green(),
                    session.current_version.to_display()
                ),
            }
        }
        Ok(())
    }
}

fn print_state(event: &StateEvent) {
    let line = match event.current {
        UpdateState::Checking => "Checking for updates...",
        UpdateState::UpdateAvailable => "Update available",
        UpdateState::Downloading => "Downloading update...",
        UpdateState::Installing => "Installing update...",
        UpdateState::Idle | UpdateState::Completed | UpdateState::Error => return,
    };
    eprintln!("{}", line.cyan());
}
