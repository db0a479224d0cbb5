//! The updater's TOML configuration file.

use crate::constants::{DEFAULT_PROBE_BYTES, DEFAULT_PROBE_TIMEOUT, DEFAULT_THREAD_COUNT, DEFAULT_USER_AGENT};
use crate::core::UpdaterError;
use crate::download::{DownloadSource, MultiThreadConfig};
use crate::utils::path_validation::validate_no_traversal;
use crate::utils::retry::RetryPolicy;
use crate::version::Channel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level updater configuration.
///
/// Every field has a default, so an empty file (or no file at all) is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Resource identifier on the update service.
    #[serde(default = "default_resource_id")]
    pub resource_id: String,

    /// Fallback current version when the install root has no version marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,

    /// `stable` or `beta`.
    #[serde(default = "default_channel")]
    pub channel: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Base URL of the update-check service.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Access key forwarded to the update service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdk: Option<String>,

    /// Directory holding the installed application. Supports `~` and `$VAR`.
    /// Defaults to the directory of the updater executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub download: DownloadSettings,

    /// Extra download locations for every release.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<MirrorConfig>,

    #[serde(default)]
    pub install: InstallSettings,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_resource_id() -> String {
    "app".to_string()
}

fn default_channel() -> String {
    Channel::Stable.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_api_base_url() -> String {
    "https://mirrorchyan.com/api/resources".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            resource_id: default_resource_id(),
            current_version: None,
            channel: default_channel(),
            user_agent: default_user_agent(),
            api_base_url: default_api_base_url(),
            cdk: None,
            install_root: None,
            log_level: default_log_level(),
            download: DownloadSettings::default(),
            mirrors: Vec::new(),
            install: InstallSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Per-request timeout, body transfer included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Chunk workers; 1 disables chunked downloads.
    #[serde(default = "default_threads")]
    pub threads: i32,

    /// Bytes per chunk; 0 splits evenly across `threads`.
    #[serde(default)]
    pub chunk_size: u64,

    /// Rank sources with a speed probe before downloading.
    #[serde(default)]
    pub probe_sources: bool,

    #[serde(default = "default_probe_bytes")]
    pub probe_bytes: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_threads() -> i32 {
    DEFAULT_THREAD_COUNT as i32
}

fn default_probe_bytes() -> u64 {
    DEFAULT_PROBE_BYTES
}

fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT.as_secs()
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            threads: default_threads(),
            chunk_size: 0,
            probe_sources: false,
            probe_bytes: default_probe_bytes(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl DownloadSettings {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub const fn multi_thread_config(&self) -> MultiThreadConfig {
        MultiThreadConfig {
            thread_count: self.threads,
            chunk_size: self.chunk_size,
        }
    }
}

/// One `[[mirrors]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub name: String,
    /// Download URL with a `{version}` placeholder for the display version.
    pub url_template: String,
    #[serde(default = "default_mirror_priority")]
    pub priority: i32,
}

fn default_mirror_priority() -> i32 {
    10
}

impl MirrorConfig {
    /// The download source for `display_version` (e.g. `v4.4.1-beta3`).
    #[must_use]
    pub fn source_for(&self, display_version: &str) -> DownloadSource {
        DownloadSource::new(
            self.name.clone(),
            self.url_template.replace("{version}", display_version),
            self.priority,
        )
    }
}

/// `[install]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSettings {
    /// Installer bundled in the payload, run when it carries no change manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer: Option<InstallerConfig>,

    /// Globs selecting install-root files that may be held by running processes.
    #[serde(default = "default_process_patterns")]
    pub process_patterns: Vec<String>,
}

fn default_process_patterns() -> Vec<String> {
    vec!["*.exe".to_string()]
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            installer: None,
            process_patterns: default_process_patterns(),
        }
    }
}

/// A bundled installer program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Path relative to the payload root.
    pub program: String,
    /// Arguments; `{install_dir}` is replaced with the install root.
    #[serde(default)]
    pub args: Vec<String>,
}

impl UpdaterConfig {
    /// `<config dir>/app-updater/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine the configuration directory"))?;
        Ok(dir.join("app-updater").join("config.toml"))
    }

    /// Load the configuration at `path` (or the default path), writing a
    /// default file first when none exists.
    pub async fn load_or_create(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };

        if fs::try_exists(&path).await.unwrap_or(false) {
            return Self::load_from(&path).await;
        }

        info!("No configuration at {}, writing defaults", path.display());
        let config = Self::default();
        config.save_to(&path).await?;
        Ok(config)
    }

    /// Load and validate the configuration at `path`.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read updater config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse updater config from {}", path.display()))?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize updater config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write updater config to {}", path.display()))?;
        Ok(())
    }

    /// Check values that serde cannot check on its own.
    pub fn validate(&self) -> Result<(), UpdaterError> {
        let invalid = |reason: String| UpdaterError::Config { reason };

        if self.resource_id.trim().is_empty() {
            return Err(invalid("resource_id cannot be empty".to_string()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent cannot be empty".to_string()));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(invalid(format!(
                "invalid log_level '{}' (expected one of: {})",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }
        self.channel.parse::<Channel>()?;
        if let Some(version) = &self.current_version {
            version.parse::<crate::version::ReleaseVersion>()?;
        }
        if self.download.timeout_secs == 0 {
            return Err(invalid("download.timeout_secs must be greater than zero".to_string()));
        }
        for mirror in &self.mirrors {
            if !mirror.url_template.contains("{version}") {
                return Err(invalid(format!(
                    "mirror '{}' url_template has no {{version}} placeholder",
                    mirror.name
                )));
            }
        }
        for pattern in &self.install.process_patterns {
            glob::Pattern::new(pattern)
                .map_err(|e| invalid(format!("invalid process pattern '{pattern}': {e}")))?;
        }
        if let Some(installer) = &self.install.installer {
            if installer.program.trim().is_empty() {
                return Err(invalid("install.installer.program cannot be empty".to_string()));
            }
            validate_no_traversal(Path::new(&installer.program)).map_err(|_| {
                invalid(format!(
                    "install.installer.program '{}' must stay inside the payload",
                    installer.program
                ))
            })?;
        }
        Ok(())
    }

    /// The configured channel; validated configs always parse.
    pub fn channel(&self) -> Result<Channel, UpdaterError> {
        self.channel.parse()
    }

    /// Expanded `install_root`, or the updater executable's directory.
    pub fn resolve_install_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.install_root {
            let expanded = shellexpand::full(root)
                .with_context(|| format!("Failed to expand install_root '{root}'"))?;
            return Ok(PathBuf::from(expanded.as_ref()));
        }

        let exe = std::env::current_exe().context("Failed to locate the current executable")?;
        exe.parent()
            .map(Path::to_path_buf)
            .context("Current executable has no parent directory")
    }
}
