//! Multi-source failover and source speed probes.

use super::DownloadEngine;
use super::progress::ProgressCallback;
use crate::core::UpdaterError;
use anyhow::Result;
use futures::future::join_all;
use reqwest::header::RANGE;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One location an artifact can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSource {
    pub url: String,
    /// Lower is preferred.
    #[serde(default)]
    pub priority: i32,
    pub name: String,
}

impl DownloadSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, priority: i32) -> Self {
        Self {
            url: url.into(),
            priority,
            name: name.into(),
        }
    }
}

/// Outcome of probing one source.
#[derive(Debug, Clone)]
pub struct SpeedTestResult {
    pub source: DownloadSource,
    /// Zero when the probe failed.
    pub bytes_per_second: u64,
    pub error: Option<UpdaterError>,
}

impl SpeedTestResult {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Sources in attempt order: ascending priority, ties keep input order.
pub(crate) fn ordered(sources: &[DownloadSource]) -> Vec<DownloadSource> {
    let mut sorted = sources.to_vec();
    sorted.sort_by_key(|source| source.priority);
    sorted
}

pub(super) async fn download_with_sources(
    engine: &DownloadEngine,
    sources: &[DownloadSource],
    dest: &Path,
    on_progress: Option<ProgressCallback>,
) -> Result<DownloadSource> {
    if sources.is_empty() {
        return Err(UpdaterError::NoSources.into());
    }

    let mut failures = Vec::with_capacity(sources.len());
    for source in ordered(sources) {
        info!("Trying download source '{}' ({})", source.name, source.url);
        match engine.download(&source.url, dest, on_progress.clone()).await {
            Ok(()) => return Ok(source),
            Err(e) => {
                warn!("Download source '{}' failed: {:#}", source.name, e);
                failures.push(format!("{} ({}): {:#}", source.name, source.url, e));
            }
        }
    }

    Err(UpdaterError::AllSourcesFailed { failures }.into())
}

pub(super) async fn test_speeds(
    engine: &DownloadEngine,
    sources: &[DownloadSource],
    byte_budget: u64,
    timeout: Duration,
) -> Result<Vec<SpeedTestResult>> {
    if sources.is_empty() {
        return Err(UpdaterError::NoSources.into());
    }

    let probes = sources
        .iter()
        .map(|source| probe(engine, source.clone(), byte_budget, timeout));
    let mut results = join_all(probes).await;

    results.sort_by_key(|result| (result.error.is_some(), Reverse(result.bytes_per_second)));
    Ok(results)
}

async fn probe(
    engine: &DownloadEngine,
    source: DownloadSource,
    byte_budget: u64,
    timeout: Duration,
) -> SpeedTestResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, read_budget(engine, &source.url, byte_budget)).await;

    let result = match outcome {
        Ok(Ok(read)) => {
            let elapsed = started.elapsed().as_secs_f64();
            let bytes_per_second = if elapsed > 0.0 {
                (read as f64 / elapsed) as u64
            } else {
                0
            };
            Ok(bytes_per_second)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(UpdaterError::Timeout {
            url: source.url.clone(),
        }),
    };

    match result {
        Ok(bytes_per_second) => {
            debug!("Source '{}' measured at {} B/s", source.name, bytes_per_second);
            SpeedTestResult {
                source,
                bytes_per_second,
                error: None,
            }
        }
        Err(error) => {
            debug!("Speed probe for '{}' failed: {}", source.name, error);
            SpeedTestResult {
                source,
                bytes_per_second: 0,
                error: Some(error),
            }
        }
    }
}

/// Read at most `byte_budget` bytes of `url`, returning how many arrived.
async fn read_budget(engine: &DownloadEngine, url: &str, byte_budget: u64) -> Result<u64, UpdaterError> {
    let mut request = engine.client().get(url);
    if byte_budget > 0 {
        request = request.header(RANGE, format!("bytes=0-{}", byte_budget - 1));
    }

    let mut response = request
        .send()
        .await
        .map_err(|e| UpdaterError::from_reqwest(url, &e))?;
    if !response.status().is_success() {
        return Err(UpdaterError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let mut read = 0u64;
    while read < byte_budget {
        match response
            .chunk()
            .await
            .map_err(|e| UpdaterError::from_reqwest(url, &e))?
        {
            Some(chunk) => read += chunk.len() as u64,
            None => break,
        }
    }
    Ok(read.min(byte_budget))
}
