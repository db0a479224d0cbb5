use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::CliConfig;
use crate::download::checksum::validate_checksum;

/// Check a file against a SHA-256 digest.
#[derive(Args, Debug)]
pub struct VerifyCommand {
    /// File to hash
    file: PathBuf,

    /// Expected digest, hex encoded
    sha256: String,
}

impl VerifyCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        validate_checksum(&self.file, &self.sha256).await?;
        if !cli.quiet {
            println!("{} Checksum matches for {}", "✓".green(), self.file.display());
        }
        Ok(())
    }
}
