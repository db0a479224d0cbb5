//! Exponential backoff for orchestration-level retries.
//!
//! The download and install engines never retry on their own. The update
//! state machine wraps individual operations in a [`RetryPolicy`], which
//! re-runs the operation only when the failure belongs to one of the
//! whitelisted [`ErrorKind`]s.

use crate::constants::{
    BACKOFF_FACTOR, DEFAULT_MAX_RETRIES, MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS,
};
use crate::core::{ErrorKind, UpdaterError};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound of any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied after every retry.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,

    /// Kinds that may be retried; anything else fails immediately.
    #[serde(default = "default_retryable")]
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            retryable: default_retryable(),
        }
    }
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_initial_delay_ms() -> u64 {
    STARTING_BACKOFF_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    MAX_BACKOFF_DELAY_MS
}

fn default_backoff_factor() -> u32 {
    BACKOFF_FACTOR
}

fn default_retryable() -> Vec<ErrorKind> {
    vec![ErrorKind::Network, ErrorKind::Api]
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether `error` carries a typed failure of a retryable kind.
    #[must_use]
    pub fn is_retryable(&self, error: &anyhow::Error) -> bool {
        UpdaterError::from_anyhow(error).is_some_and(|e| self.retryable.contains(&e.kind()))
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.backoff_factor).saturating_pow(attempt);
        let delay = self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// The full delay schedule, one entry per allowed retry.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.max_retries)
            .map(|attempt| self.delay_for(u32::try_from(attempt).unwrap_or(u32::MAX)))
            .collect()
    }

    /// Run `operation`, retrying whitelisted failures with backoff.
    ///
    /// `label` only appears in log output.
    pub async fn run<T, F, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        tokio_retry::RetryIf::spawn(
            self.delays(),
            operation,
            |error: &anyhow::Error| {
                let retry = self.is_retryable(error);
                if retry {
                    warn!("{label} failed (will retry): {error:#}");
                }
                retry
            },
        )
        .await
    }
}
