//! HTTP client for the mirror update-check service.
//!
//! `GET <base>/<resource_id>/latest?current_version=..&channel=..&os=&arch=[&cdk=..]`
//! answers with
//!
//! ```json
//! {
//!   "code": 0,
//!   "msg": "success",
//!   "data": {
//!     "version_name": "v4.4.1-beta3",
//!     "version_number": 61,
//!     "url": "https://...",
//!     "sha256": "...",
//!     "channel": "beta",
//!     "release_note": "...",
//!     "filesize": 1048576
//!   }
//! }
//! ```
//!
//! `url`, `sha256` and `filesize` are only present for authorised requests.
//! A non-zero `code` means the service has nothing to offer this caller.

use super::checker::{CheckRequest, UpdateChecker, UpdateInfo};
use crate::config::{MirrorConfig, UpdaterConfig};
use crate::core::UpdaterError;
use crate::download::DownloadSource;
use crate::version::ReleaseVersion;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct MirrorResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<MirrorData>,
}

#[derive(Debug, Default, Deserialize)]
struct MirrorData {
    #[serde(default)]
    version_name: String,
    #[serde(default)]
    #[allow(dead_code)]
    version_number: i64,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    release_note: String,
    #[serde(default)]
    filesize: Option<u64>,
}

/// [`UpdateChecker`] backed by the mirror service.
#[derive(Debug, Clone)]
pub struct MirrorClient {
    client: reqwest::Client,
    base_url: String,
    mirrors: Vec<MirrorConfig>,
    timeout: Duration,
}

impl MirrorClient {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        mirrors: Vec<MirrorConfig>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mirrors,
            timeout,
        })
    }

    pub fn from_config(config: &UpdaterConfig) -> Result<Self> {
        Self::new(
            config.api_base_url.clone(),
            &config.user_agent,
            config.mirrors.clone(),
            crate::constants::DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn endpoint(&self, resource_id: &str) -> String {
        format!("{}/{}/latest", self.base_url, resource_id)
    }

    fn interpret(&self, response: MirrorResponse, request: &CheckRequest) -> Result<UpdateInfo> {
        if response.code != 0 {
            warn!(
                "Update service answered code {}: {}",
                response.code, response.msg
            );
            return Ok(UpdateInfo::up_to_date());
        }

        let Some(data) = response.data.filter(|d| !d.version_name.trim().is_empty()) else {
            debug!("Update service returned no version");
            return Ok(UpdateInfo::up_to_date());
        };

        let latest: ReleaseVersion = data.version_name.parse().map_err(|_| UpdaterError::Api {
            reason: format!("unparseable version_name '{}'", data.version_name),
        })?;

        if !latest.is_newer_than(&request.current_version) {
            info!(
                "Current version {} is up to date (latest {})",
                request.current_version, latest
            );
            return Ok(UpdateInfo::up_to_date());
        }

        let mut sources = Vec::with_capacity(self.mirrors.len() + 1);
        if let Some(url) = data.url.filter(|u| !u.trim().is_empty()) {
            sources.push(DownloadSource::new("primary", url, 0));
        }
        sources.extend(
            self.mirrors
                .iter()
                .map(|mirror| mirror.source_for(&data.version_name)),
        );

        info!(
            "Update available: {} -> {} ({} channel, {} sources)",
            request.current_version,
            latest,
            data.channel,
            sources.len()
        );
        Ok(UpdateInfo {
            available: true,
            new_version: Some(latest),
            version_name: data.version_name,
            sources,
            release_notes: data.release_note,
            sha256: data.sha256.filter(|s| !s.trim().is_empty()),
            file_size: data.filesize,
        })
    }
}

impl UpdateChecker for MirrorClient {
    async fn check(&self, request: &CheckRequest) -> Result<UpdateInfo> {
        let url = self.endpoint(&request.resource_id);
        let current = request.current_version.to_version_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("current_version", current.as_str()),
            ("channel", request.channel.as_str()),
            ("os", ""),
            ("arch", ""),
        ];
        if let Some(cdk) = request.cdk.as_deref().filter(|c| !c.is_empty()) {
            query.push(("cdk", cdk));
        }

        debug!("Checking for updates at {}", url);
        let response = self
            .client
            .get(&url)
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&url, &e))?;

        if !response.status().is_success() {
            return Err(UpdaterError::HttpStatus {
                url,
                status: response.status().as_u16(),
            }
            .into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&url, &e))?;
        let parsed: MirrorResponse = serde_json::from_str(&body).map_err(|e| UpdaterError::Api {
            reason: format!("malformed response: {e}"),
        })?;

        self.interpret(parsed, request)
    }
}
