//! The update-check collaborator contract.

use crate::download::DownloadSource;
use crate::version::{Channel, ReleaseVersion};
use anyhow::Result;
use std::future::Future;

/// What the state machine asks the update service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub resource_id: String,
    pub current_version: ReleaseVersion,
    pub channel: Channel,
    pub cdk: Option<String>,
}

/// The service's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateInfo {
    pub available: bool,
    pub new_version: Option<ReleaseVersion>,
    /// Version label as published, e.g. `v4.4.1-beta3`.
    pub version_name: String,
    pub sources: Vec<DownloadSource>,
    pub release_notes: String,
    /// Expected SHA-256 of the artifact, when published.
    pub sha256: Option<String>,
    pub file_size: Option<u64>,
}

impl UpdateInfo {
    /// Answer meaning "already up to date".
    #[must_use]
    pub fn up_to_date() -> Self {
        Self::default()
    }
}

/// Decides whether a newer release exists and where to fetch it.
pub trait UpdateChecker: Send + Sync {
    fn check(&self, request: &CheckRequest) -> impl Future<Output = Result<UpdateInfo>> + Send;
}
