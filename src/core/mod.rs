//! Core types shared by every part of the updater.
//!
//! At the moment this is the error model: [`UpdaterError`], its
//! [`ErrorKind`] classification and the [`ErrorContext`] used by the CLI to
//! present failures.

pub mod error;

pub use error::{ErrorContext, ErrorKind, UpdaterError, user_friendly_error};
