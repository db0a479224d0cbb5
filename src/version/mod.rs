//! Release version strings and the on-disk version marker.
//!
//! Releases are numbered `major.minor.patch.beta`. A `beta` of zero marks a
//! stable release; any other value is the n-th beta leading up to it. Two
//! spellings are accepted:
//!
//! - the four-part form stored in the version marker: `4.4.1.3`, `4.4.1.0`
//! - the display form published by the update service: `v4.4.1-beta3`,
//!   `v4.4.1-beta.3`, `v4.4.1`
//!
//! # Ordering
//!
//! Versions compare by major, minor and patch first. For equal
//! `major.minor.patch`, betas ascend by number and the stable release sorts
//! after every beta of the same triple:
//!
//! ```rust
//! use app_updater::version::ReleaseVersion;
//!
//! let beta2: ReleaseVersion = "4.4.1.2".parse().unwrap();
//! let beta3: ReleaseVersion = "v4.4.1-beta3".parse().unwrap();
//! let stable: ReleaseVersion = "v4.4.1".parse().unwrap();
//! let next: ReleaseVersion = "4.4.2.1".parse().unwrap();
//!
//! assert!(beta2 < beta3);
//! assert!(beta3 < stable);
//! assert!(stable < next);
//! ```

use crate::constants::{DEFAULT_VERSION, VERSION_FILE};
use crate::core::UpdaterError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Release channel a version belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    Beta,
}

impl Channel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Beta => "beta",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = UpdaterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            other => Err(UpdaterError::Config {
                reason: format!("unknown channel '{other}' (expected 'stable' or 'beta')"),
            }),
        }
    }
}

/// A parsed `major.minor.patch.beta` release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Zero for stable releases.
    pub beta: u64,
}

impl ReleaseVersion {
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64, beta: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            beta,
        }
    }

    /// Four-part form: `4.4.1.3`, `4.4.1.0`.
    #[must_use]
    pub fn to_version_string(&self) -> String {
        format!("{}.{}.{}.{}", self.major, self.minor, self.patch, self.beta)
    }

    /// Display form: `v4.4.1-beta3` or `v4.4.1`.
    #[must_use]
    pub fn to_display(&self) -> String {
        if self.beta == 0 {
            format!("v{}.{}.{}", self.major, self.minor, self.patch)
        } else {
            format!("v{}.{}.{}-beta{}", self.major, self.minor, self.patch, self.beta)
        }
    }

    #[must_use]
    pub const fn channel(&self) -> Channel {
        if self.beta == 0 {
            Channel::Stable
        } else {
            Channel::Beta
        }
    }

    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self > other
    }

    const fn beta_rank(&self) -> u64 {
        if self.beta == 0 { u64::MAX } else { self.beta }
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.beta_rank()).cmp(&(
            other.major,
            other.minor,
            other.patch,
            other.beta_rank(),
        ))
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display())
    }
}

impl FromStr for ReleaseVersion {
    type Err = UpdaterError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || UpdaterError::InvalidVersion {
            version: input.to_string(),
        };

        let trimmed = input.trim();
        let bare = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let parts: Vec<&str> = bare.split('.').collect();
        if parts.len() == 4 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())) {
            let number = |s: &str| s.parse::<u64>().map_err(|_| invalid());
            return Ok(Self::new(
                number(parts[0])?,
                number(parts[1])?,
                number(parts[2])?,
                number(parts[3])?,
            ));
        }

        let parsed = semver::Version::parse(bare).map_err(|_| invalid())?;
        let beta = if parsed.pre.is_empty() {
            0
        } else {
            parse_beta(parsed.pre.as_str()).ok_or_else(invalid)?
        };

        Ok(Self::new(parsed.major, parsed.minor, parsed.patch, beta))
    }
}

/// `beta3` or `beta.3` to `3`.
fn parse_beta(pre: &str) -> Option<u64> {
    let rest = pre.strip_prefix("beta")?;
    let digits = rest.strip_prefix('.').unwrap_or(rest);
    digits.parse().ok().filter(|n| *n > 0)
}

fn default_main_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Contents of `resources/version.json` under the install root.
///
/// Only `main_version` is interpreted; every other field is carried through
/// a load/save round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionFile {
    #[serde(default = "default_main_version")]
    pub main_version: String,

    #[serde(default = "empty_object")]
    pub version_info: serde_json::Value,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for VersionFile {
    fn default() -> Self {
        Self {
            main_version: default_main_version(),
            version_info: empty_object(),
            extra: serde_json::Map::new(),
        }
    }
}

impl VersionFile {
    /// Location of the marker under `install_root`.
    #[must_use]
    pub fn path_in(install_root: &Path) -> PathBuf {
        install_root.join(VERSION_FILE)
    }

    /// Load the marker, falling back to `0.0.0.0` when it is missing,
    /// unreadable, malformed or names no version.
    pub async fn load_or_default(install_root: &Path) -> Self {
        let path = Self::path_in(install_root);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No version file at {:?}, using {}", path, DEFAULT_VERSION);
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read version file {:?}: {}, using {}", path, e, DEFAULT_VERSION);
                return Self::default();
            }
        };

        match serde_json::from_str::<Self>(&content) {
            Ok(file) if !file.main_version.trim().is_empty() => file,
            Ok(file) => {
                warn!("Version file {:?} has no main_version, using {}", path, DEFAULT_VERSION);
                Self {
                    main_version: default_main_version(),
                    ..file
                }
            }
            Err(e) => {
                warn!("Failed to parse version file {:?}: {}, using {}", path, e, DEFAULT_VERSION);
                Self::default()
            }
        }
    }

    /// The parsed `main_version`.
    pub fn version(&self) -> Result<ReleaseVersion, UpdaterError> {
        self.main_version.parse()
    }

    /// Write the marker under `install_root`, creating `resources/`.
    pub async fn save(&self, install_root: &Path) -> Result<()> {
        let path = Self::path_in(install_root);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpdaterError::file_system("create directory", parent, &e))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| UpdaterError::file_system("write version file", &path, &e))?;
        debug!("Wrote version {} to {:?}", self.main_version, path);
        Ok(())
    }
}
