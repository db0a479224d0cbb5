use super::checker::UpdateInfo;
use crate::version::ReleaseVersion;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

/// Record of one pass through the update state machine.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub current_version: ReleaseVersion,
    /// Set once the check finds a newer release.
    pub update: Option<UpdateInfo>,
    /// Downloaded artifact, once fetched.
    pub artifact: Option<PathBuf>,
    pub installed: bool,
    /// User-facing message for the failure that ended the session.
    pub error: Option<String>,
}

impl UpdateSession {
    #[must_use]
    pub fn new(current_version: ReleaseVersion) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            current_version,
            update: None,
            artifact: None,
            installed: false,
            error: None,
        }
    }

    #[must_use]
    pub fn new_version(&self) -> Option<ReleaseVersion> {
        self.update.as_ref().and_then(|info| info.new_version)
    }

    /// The version the install root is at after this session.
    #[must_use]
    pub fn effective_version(&self) -> ReleaseVersion {
        if self.installed {
            self.new_version().unwrap_or(self.current_version)
        } else {
            self.current_version
        }
    }
}
