//! Global constants used throughout the updater.
//!
//! Timeouts, buffer sizes, file-name conventions and retry parameters that
//! are shared by more than one module live here so magic numbers stay
//! discoverable.

use std::time::Duration;

/// Default timeout applied to every HTTP request (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum wall-clock interval between two progress snapshots (100 ms).
///
/// The final snapshot of an operation is always emitted regardless of this
/// interval.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the buffered writer used while streaming response bodies (64 KiB).
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Read buffer used when hashing files (64 KiB).
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Worker count used by multi-threaded downloads when none is configured.
pub const DEFAULT_THREAD_COUNT: usize = 4;

/// Default byte budget of a single speed probe (256 KiB).
pub const DEFAULT_PROBE_BYTES: u64 = 256 * 1024;

/// Default deadline of a single speed probe (5 seconds).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Suffix given to files that were renamed out of the way of an update.
pub const OLD_FILE_SUFFIX: &str = ".old";

/// Suffix of the marker files recording deferred deletions.
pub const DELETE_MARKER_SUFFIX: &str = ".delete_on_restart";

/// Prefix of the per-process backup directory created under the install root.
pub const BACKUP_DIR_PREFIX: &str = ".backup_";

/// Prefix of temporary directories created by the install engine.
pub const TEMP_DIR_PREFIX: &str = "updater_";

/// Name of the directory (under the install root) that receives downloads.
pub const DOWNLOAD_TEMP_DIR: &str = "UPDATE_TEMP";

/// File name of the downloaded update artifact.
pub const DOWNLOAD_FILE_NAME: &str = "update.zip";

/// File name of the optional change manifest at the root of an update archive.
pub const CHANGES_MANIFEST: &str = "changes.json";

/// Location of the version marker file, relative to the install root.
pub const VERSION_FILE: &str = "resources/version.json";

/// Version reported when no version marker file can be read.
pub const DEFAULT_VERSION: &str = "0.0.0.0";

/// Default `User-Agent` header sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("app-updater/", env!("CARGO_PKG_VERSION"));

/// Default number of retries performed by the orchestration layer.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Starting delay for exponential backoff (1 second).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 1000;

/// Maximum backoff delay for exponential backoff (30 seconds).
///
/// Exponential backoff delays are capped at this value to prevent
/// excessive wait times during retry operations.
pub const MAX_BACKOFF_DELAY_MS: u64 = 30_000;

/// Multiplier applied to the backoff delay after every attempt.
pub const BACKOFF_FACTOR: u32 = 2;
