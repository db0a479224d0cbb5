//! Integration test suite for app-updater
//!
//! End-to-end tests against a local axum server started per test. Nothing
//! here reaches the public network.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! RUST_LOG=app_updater=debug cargo test --test integration -- --nocapture
//! ```
//!
//! # Test Organization
//!
//! - **cli**: the `app-updater` binary via `assert_cmd`
//! - **download**: single-stream and resumed downloads, progress, timeouts
//! - **install**: extraction, manifests, rollback, deferred deletion
//! - **multi_threaded**: chunked downloads and their fallback
//! - **sources**: priority failover across download sources
//! - **speed**: source probing
//! - **update_flow**: the state machine against the mock update service

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod cli;
mod download;
mod update_flow;
