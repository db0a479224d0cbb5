//! Shared helpers.
//!
//! - [`fs`] - async file helpers used by the install engine
//! - [`path_validation`] - lexical checks for untrusted payload paths
//! - [`progress`] - terminal progress bars fed by download snapshots
//! - [`retry`] - exponential backoff for the update state machine

pub mod fs;
pub mod path_validation;
pub mod progress;
pub mod retry;

pub use fs::{copy_file_with_dirs, format_bytes, path_exists, remove_file_if_exists};
pub use path_validation::{clean_relative_path, validate_no_traversal};
pub use progress::ProgressBar;
pub use retry::RetryPolicy;
