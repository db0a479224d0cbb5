//! Unit tests for app-updater's public helpers
//!
//! Fast tests with no network and at most a temp directory.
//!
//! ```bash
//! cargo test --test unit
//! ```

mod error_tests;
mod version_tests;
