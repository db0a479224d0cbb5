//! Resolution rules shared by the `run` and `check` commands.

use anyhow::Result;
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::UpdaterConfig;
use crate::constants::DEFAULT_VERSION;
use crate::version::{Channel, ReleaseVersion, VersionFile};

/// Overrides accepted by every command that talks to the update service.
#[derive(Args, Debug, Clone, Default)]
pub struct UpdateTarget {
    /// Release channel (`stable` or `beta`), overriding the config file
    #[arg(long)]
    pub channel: Option<String>,

    /// Installed version, overriding the version marker and config file
    #[arg(long)]
    pub current_version: Option<String>,

    /// Directory holding the installed application
    #[arg(long)]
    pub install_root: Option<PathBuf>,
}

impl UpdateTarget {
    pub fn install_root(&self, config: &UpdaterConfig) -> Result<PathBuf> {
        match &self.install_root {
            Some(root) => Ok(root.clone()),
            None => config.resolve_install_root(),
        }
    }

    /// Command line first, then the configured channel.
    pub fn channel(&self, config: &UpdaterConfig) -> Result<Channel> {
        let channel = match &self.channel {
            Some(channel) => channel.parse()?,
            None => config.channel()?,
        };
        Ok(channel)
    }

    /// Command line first, then the version marker under `install_root`,
    /// then the config file, then `0.0.0.0`.
    pub async fn current_version(
        &self,
        config: &UpdaterConfig,
        install_root: &Path,
    ) -> Result<ReleaseVersion> {
        if let Some(version) = &self.current_version {
            debug!("Using current version {} from the command line", version);
            return Ok(version.parse()?);
        }

        if tokio::fs::try_exists(VersionFile::path_in(install_root))
            .await
            .unwrap_or(false)
        {
            let marker = VersionFile::load_or_default(install_root).await;
            if marker.main_version != DEFAULT_VERSION {
                debug!("Using current version {} from the version marker", marker.main_version);
                return Ok(marker.version()?);
            }
        }

        if let Some(version) = &config.current_version {
            debug!("Using current version {} from the config file", version);
            return Ok(version.parse()?);
        }

        Ok(DEFAULT_VERSION.parse()?)
    }
}
