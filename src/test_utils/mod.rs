//! Test utilities for unit and integration tests
//!
//! Available to the crate's own tests and, through the `test-utils`
//! feature, to the `tests/` suites.
//!
//! # Example
//!
//! ```rust,no_run
//! use app_updater::test_utils::{ZipFixture, init_test_logging};
//!
//! init_test_logging(None);
//! let bytes = ZipFixture::new()
//!     .file("app.exe", "new build")
//!     .manifest(&[], &["app.exe"], &[])
//!     .build();
//! assert!(!bytes.is_empty());
//! ```

pub mod fixtures;

pub use fixtures::{ZipFixture, pattern_bytes, sha256_hex};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither, logging
/// stays off.
///
/// ```bash
/// RUST_LOG=app_updater=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
