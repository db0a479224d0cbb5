//! Error handling for the updater.
//!
//! Every failure the download engine, the install engine and the update state
//! machine can raise is an [`UpdaterError`] variant. Each variant belongs to one
//! [`ErrorKind`]; the kind drives two decisions made outside the engines:
//!
//! - whether the orchestration layer may retry an operation (see
//!   [`crate::utils::retry::RetryPolicy`])
//! - which short, human-readable message is shown to the user
//!
//! Public operations return [`anyhow::Result`]. Typed failures travel inside the
//! `anyhow::Error` and are recovered with [`UpdaterError::from_anyhow`] or
//! `downcast_ref::<UpdaterError>()`.
//!
//! # Presenting errors
//!
//! [`user_friendly_error`] turns any `anyhow::Error` into an [`ErrorContext`]
//! carrying a suggestion and optional details. The binary prints it with
//! [`ErrorContext::display`] and exits with status 1:
//!
//! ```rust,no_run
//! use app_updater::core::error::user_friendly_error;
//!
//! # fn run() -> anyhow::Result<()> { Ok(()) }
//! if let Err(e) = run() {
//!     user_friendly_error(e).display();
//!     std::process::exit(1);
//! }
//! ```

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Broad classification of an [`UpdaterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection failures, timeouts and unexpected HTTP status codes.
    Network,
    /// Checksum mismatch on a downloaded artifact.
    Integrity,
    /// Corrupt archive or an archive entry escaping the destination.
    Archive,
    /// Permission problems, missing paths, full disks.
    FileSystem,
    /// Malformed or unsafe change manifest.
    Manifest,
    /// Restoring backups failed after an apply failure.
    Rollback,
    /// The update-check service answered with something unusable.
    Api,
    /// Invalid configuration or invalid input values.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "NetworkError",
            Self::Integrity => "IntegrityError",
            Self::Archive => "ArchiveError",
            Self::FileSystem => "FileSystemError",
            Self::Manifest => "ManifestError",
            Self::Rollback => "RollbackError",
            Self::Api => "ApiError",
            Self::Config => "ConfigError",
        };
        f.write_str(name)
    }
}

/// All typed failures raised by the updater.
#[derive(Error, Debug, Clone)]
pub enum UpdaterError {
    /// A request could not be sent or its body could not be read.
    #[error("Network request to {url} failed: {reason}")]
    Network {
        /// Requested URL
        url: String,
        /// Transport error description
        reason: String,
    },

    /// A request did not complete before the configured timeout.
    #[error("Request to {url} timed out")]
    Timeout {
        /// Requested URL
        url: String,
    },

    /// The server answered with a status the operation cannot accept.
    #[error("Server returned HTTP {status} for {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// A ranged request was answered with the whole resource.
    #[error("Server did not honor the byte-range request for {url}")]
    RangeNotHonored {
        /// Requested URL
        url: String,
    },

    /// A ranged transfer ended before the requested range was complete.
    #[error("Incomplete transfer from {url}: expected {expected} bytes, received {received}")]
    IncompleteTransfer {
        /// Requested URL
        url: String,
        /// Bytes the range promised
        expected: u64,
        /// Bytes actually written
        received: u64,
    },

    /// A multi-source download was attempted with an empty source list.
    #[error("No download sources were provided")]
    NoSources,

    /// Every source of a multi-source download failed.
    #[error("All download sources failed: {}", .failures.join("; "))]
    AllSourcesFailed {
        /// One `name (url): reason` line per source, in attempt order
        failures: Vec<String>,
    },

    /// The SHA-256 digest of a file differs from the expected one.
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// File that was hashed
        path: String,
        /// Expected lower-case hex digest
        expected: String,
        /// Computed lower-case hex digest
        actual: String,
    },

    /// The archive could not be opened or decoded.
    #[error("Invalid archive {path}: {reason}")]
    Archive {
        /// Archive path
        path: String,
        /// Decoder error description
        reason: String,
    },

    /// An archive entry would be written outside the destination root.
    #[error("Archive entry escapes the destination directory: {entry}")]
    PathTraversal {
        /// Entry name as stored in the archive
        entry: String,
    },

    /// A file system operation failed.
    #[error("File system operation failed: {operation} {path}: {reason}")]
    FileSystem {
        /// What was being done (e.g. "create directory")
        operation: String,
        /// Path involved
        path: String,
        /// OS error description
        reason: String,
    },

    /// The change manifest exists but cannot be used.
    #[error("Invalid change manifest {path}: {reason}")]
    Manifest {
        /// Manifest path
        path: String,
        /// Parse or validation failure
        reason: String,
    },

    /// Applying an update failed and every touched file was restored.
    #[error("Update failed and was rolled back: {cause}")]
    RolledBack {
        /// The failure that triggered the rollback
        cause: String,
    },

    /// Applying an update failed and restoring the backups failed too.
    #[error("Update failed and rollback failed: update error: {cause}, rollback error: {rollback}")]
    Rollback {
        /// The failure that triggered the rollback
        cause: String,
        /// The failure raised while restoring
        rollback: String,
    },

    /// The update-check service returned an unusable response.
    #[error("Update check failed: {reason}")]
    Api {
        /// Description of the problem
        reason: String,
    },

    /// Configuration values are invalid.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of the problem
        reason: String,
    },

    /// A version string could not be parsed.
    #[error("Invalid version string: {version}")]
    InvalidVersion {
        /// The rejected input
        version: String,
    },

    /// A bundled installer program exited unsuccessfully.
    #[error("Installer {program} failed: {reason}")]
    InstallerFailed {
        /// Program path
        program: String,
        /// Exit status or spawn error
        reason: String,
    },

    /// Another updater process holds the instance lock.
    #[error("Another updater instance is already running (lock: {lock_path})")]
    AlreadyRunning {
        /// Lock file path
        lock_path: String,
    },
}

impl UpdaterError {
    /// Build a [`UpdaterError::FileSystem`] from an I/O error.
    pub fn file_system(operation: &str, path: &Path, source: &std::io::Error) -> Self {
        Self::FileSystem {
            operation: operation.to_string(),
            path: path.display().to_string(),
            reason: source.to_string(),
        }
    }

    /// Classify a `reqwest` transport error for `url`.
    pub fn from_reqwest(url: &str, source: &reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                reason: source.to_string(),
            }
        }
    }

    /// The kind this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::HttpStatus { .. }
            | Self::RangeNotHonored { .. }
            | Self::IncompleteTransfer { .. }
            | Self::NoSources
            | Self::AllSourcesFailed { .. } => ErrorKind::Network,
            Self::ChecksumMismatch { .. } => ErrorKind::Integrity,
            Self::Archive { .. } | Self::PathTraversal { .. } => ErrorKind::Archive,
            Self::FileSystem { .. }
            | Self::RolledBack { .. }
            | Self::InstallerFailed { .. }
            | Self::AlreadyRunning { .. } => ErrorKind::FileSystem,
            Self::Manifest { .. } => ErrorKind::Manifest,
            Self::Rollback { .. } => ErrorKind::Rollback,
            Self::Api { .. } => ErrorKind::Api,
            Self::Config { .. } | Self::InvalidVersion { .. } => ErrorKind::Config,
        }
    }

    /// Short message suitable for end users, one per [`ErrorKind`].
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Network => "Network unreachable, check your connection and try again",
            ErrorKind::Integrity => "The downloaded update is corrupted, it will not be installed",
            ErrorKind::Archive => "The update package is damaged or unsafe",
            ErrorKind::FileSystem => "File operation failed, check permissions and free disk space",
            ErrorKind::Manifest => "The update package contains an invalid change list",
            ErrorKind::Rollback => {
                "The update failed and the previous files could not be fully restored"
            }
            ErrorKind::Api => "The update server responded unexpectedly, try again later",
            ErrorKind::Config => "The configuration is invalid, defaults will be used where possible",
        }
    }

    /// Find the first [`UpdaterError`] inside an `anyhow::Error` chain.
    #[must_use]
    pub fn from_anyhow(error: &anyhow::Error) -> Option<&Self> {
        error.chain().find_map(|cause| cause.downcast_ref::<Self>())
    }
}

/// Error context wrapper that provides user-friendly error information.
///
/// Wraps an [`UpdaterError`] with an optional suggestion and optional details
/// for display in the terminal.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying updater error
    pub error: UpdaterError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: UpdaterError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr: error in red, details in yellow, suggestion in green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

fn create_error_context(error: UpdaterError) -> ErrorContext {
    let suggestion = error.user_message();
    let context = ErrorContext::new(error);
    match &context.error {
        UpdaterError::Rollback { .. } => context.with_suggestion(suggestion).with_details(
            "Files listed in the change manifest may be in an inconsistent state; reinstall the application",
        ),
        UpdaterError::ChecksumMismatch { .. } => context
            .with_suggestion(suggestion)
            .with_details("The artifact may have been truncated or tampered with in transit"),
        UpdaterError::PathTraversal { .. } => context
            .with_suggestion(suggestion)
            .with_details("The archive contains entries that would be written outside the install directory"),
        UpdaterError::AlreadyRunning { .. } => context
            .with_suggestion("Wait for the other updater to finish, or remove the stale lock file"),
        _ => context.with_suggestion(suggestion),
    }
}

/// Convert any error into an [`ErrorContext`] with a suggestion.
///
/// Typed [`UpdaterError`]s anywhere in the chain get the per-kind message;
/// bare I/O and TOML errors are mapped onto the closest kind; anything else
/// becomes a generic file system error carrying the full message chain.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(updater_error) = UpdaterError::from_anyhow(&error) {
        let mut context = create_error_context(updater_error.clone());
        if error.chain().count() > 1 && context.details.is_none() {
            context = context.with_details(format!("{error:#}"));
        }
        return context;
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(UpdaterError::FileSystem {
                    operation: "access".to_string(),
                    path: "unknown".to_string(),
                    reason: io_error.to_string(),
                })
                .with_suggestion("Try running with elevated permissions or check file ownership")
                .with_details("The updater doesn't have permission to read or write a file");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(UpdaterError::FileSystem {
                    operation: "access".to_string(),
                    path: "unknown".to_string(),
                    reason: io_error.to_string(),
                })
                .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(UpdaterError::Config {
            reason: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax of the updater configuration file");
    }

    ErrorContext::new(UpdaterError::FileSystem {
        operation: "update".to_string(),
        path: "unknown".to_string(),
        reason: format!("{error:#}"),
    })
    .with_suggestion("Re-run with --verbose for more information")
}
