use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::CliConfig;
use super::common::UpdateTarget;
use crate::config::UpdaterConfig;
use crate::update::{CheckRequest, MirrorClient, UpdateChecker};

/// Ask the update service whether a newer release exists.
#[derive(Args, Debug)]
pub struct CheckCommand {
    #[command(flatten)]
    target: UpdateTarget,

    /// Print the answer as JSON
    #[arg(long)]
    json: bool,
}

impl CheckCommand {
    pub async fn execute(self, cli: &CliConfig, config: UpdaterConfig) -> Result<()> {
        let install_root = self.target.install_root(&config)?;
        let request = CheckRequest {
            resource_id: config.resource_id.clone(),
            current_version: self.target.current_version(&config, &install_root).await?,
            channel: self.target.channel(&config)?,
            cdk: config.cdk.clone(),
        };

        let checker = MirrorClient::from_config(&config)?;
        let checker = &checker;
        let request = &request;
        let info = config
            .retry
            .run("Update check", move || checker.check(request))
            .await?;

        if self.json {
            let sources: Vec<_> = info.sources.iter().map(|s| &s.url).collect();
            let value = serde_json::json!({
                "available": info.available,
                "current_version": request.current_version.to_version_string(),
                "new_version": info.new_version.map(|v| v.to_version_string()),
                "version_name": info.version_name,
                "channel": request.channel.as_str(),
                "sources": sources,
                "sha256": info.sha256,
                "release_notes": info.release_notes,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        if cli.quiet {
            return Ok(());
        }
        match info.new_version.filter(|_| info.available) {
            Some(version) => {
                println!(
                    "Update available: {} -> {} ({})",
                    request.current_version.to_display(),
                    version.to_display().green().bold(),
                    request.channel
                );
                if !info.release_notes.trim().is_empty() {
                    println!("\n{}", info.release_notes.trim());
                }
            }
            None => println!(
                "{} {} is up to date",
                "✓".green(),
                request.current_version.to_display()
            ),
        }
        Ok(())
    }
}
