//! The update state machine.
//!
//! ```text
//! Idle -> Checking -> UpdateAvailable -> Downloading -> Installing -> Completed
//!            |                                                  \
//!            +-> Completed (nothing newer)          any failure -> Error
//! ```
//!
//! Each state's work runs to completion before the next transition is
//! published. The update check and the download are retried under the
//! configured [`RetryPolicy`]; installation is never retried because it is
//! already transactional.
//!
//! # Cancellation
//!
//! Cancel the token from [`UpdateMachine::cancellation_token`] instead of
//! dropping [`UpdateMachine::run`]. Checking and downloading stop at once.
//! `Installing` always runs to completion or rollback, so the install root
//! never holds a half-applied payload; the session ends after it.

use super::checker::{CheckRequest, UpdateChecker, UpdateInfo};
use super::session::UpdateSession;
use super::state::{StateObserver, StateTracker, UpdateState};
use crate::config::{InstallerConfig, UpdaterConfig};
use crate::constants::{
    CHANGES_MANIFEST, DEFAULT_PROBE_BYTES, DEFAULT_PROBE_TIMEOUT, DOWNLOAD_FILE_NAME,
    DOWNLOAD_TEMP_DIR, OLD_FILE_SUFFIX,
};
use crate::core::UpdaterError;
use crate::download::{DownloadEngine, DownloadSource, MultiThreadConfig, ProgressCallback};
use crate::install::{ChangesManifest, InstallEngine, RunningFileOutcome};
use crate::utils::retry::RetryPolicy;
use crate::version::{Channel, ReleaseVersion, VersionFile};
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Source probing before a multi-source download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub byte_budget: u64,
    pub timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            byte_budget: DEFAULT_PROBE_BYTES,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Everything the machine needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub resource_id: String,
    pub current_version: ReleaseVersion,
    pub channel: Channel,
    pub cdk: Option<String>,
    pub install_root: PathBuf,
    pub multi_thread: MultiThreadConfig,
    /// `None` keeps the published source order.
    pub probe: Option<ProbeSettings>,
    pub retry: RetryPolicy,
    pub installer: Option<InstallerConfig>,
    /// Globs over install-root file names that may be held by running processes.
    pub process_patterns: Vec<String>,
    /// File name never touched by running-process handling.
    pub self_exe_name: Option<String>,
}

impl UpdateOptions {
    #[must_use]
    pub fn new(install_root: impl Into<PathBuf>, current_version: ReleaseVersion) -> Self {
        Self {
            resource_id: "app".to_string(),
            current_version,
            channel: Channel::Stable,
            cdk: None,
            install_root: install_root.into(),
            multi_thread: MultiThreadConfig::default(),
            probe: None,
            retry: RetryPolicy::default(),
            installer: None,
            process_patterns: Vec::new(),
            self_exe_name: None,
        }
    }

    /// Options for `config` once version, channel and install root are resolved.
    #[must_use]
    pub fn from_config(
        config: &UpdaterConfig,
        install_root: PathBuf,
        current_version: ReleaseVersion,
        channel: Channel,
    ) -> Self {
        let probe = config.download.probe_sources.then(|| ProbeSettings {
            byte_budget: config.download.probe_bytes,
            timeout: config.download.probe_timeout(),
        });
        let self_exe_name = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name().map(|name| name.to_string_lossy().into_owned()));

        Self {
            resource_id: config.resource_id.clone(),
            current_version,
            channel,
            cdk: config.cdk.clone(),
            install_root,
            multi_thread: config.download.multi_thread_config(),
            probe,
            retry: config.retry.clone(),
            installer: config.install.installer.clone(),
            process_patterns: config.install.process_patterns.clone(),
            self_exe_name,
        }
    }

    fn download_dir(&self) -> PathBuf {
        self.install_root.join(DOWNLOAD_TEMP_DIR)
    }
}

/// How an extracted payload reaches the install root.
#[derive(Debug)]
enum Payload {
    /// `changes.json` lists the changes.
    Manifest(ChangesManifest),
    /// A bundled installer does the work.
    Installer(InstallerConfig),
    /// Every extracted file replaces its counterpart.
    FullReplacement(ChangesManifest),
}

impl Payload {
    fn touches(&self, file_name: &str) -> bool {
        match self {
            Self::Installer(_) => true,
            Self::Manifest(manifest) | Self::FullReplacement(manifest) => manifest
                .copy_paths()
                .chain(manifest.deleted.iter().map(String::as_str))
                .any(|path| path == file_name),
        }
    }
}

/// Drives one update session from `Idle` to a terminal state.
pub struct UpdateMachine<C> {
    checker: C,
    downloads: DownloadEngine,
    installer: InstallEngine,
    options: UpdateOptions,
    tracker: Arc<StateTracker>,
    session: UpdateSession,
    on_progress: Option<ProgressCallback>,
    cancellation: CancellationToken,
}

impl<C: UpdateChecker> UpdateMachine<C> {
    pub fn new(checker: C, downloads: DownloadEngine, options: UpdateOptions) -> Self {
        let installer = InstallEngine::new(options.install_root.clone());
        let session = UpdateSession::new(options.current_version);
        Self {
            checker,
            downloads,
            installer,
            options,
            tracker: Arc::new(StateTracker::new()),
            session,
            on_progress: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Report download progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn state(&self) -> UpdateState {
        self.tracker.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.tracker.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn StateObserver>) {
        self.tracker.add_observer(observer);
    }

    pub fn tracker(&self) -> Arc<StateTracker> {
        self.tracker.clone()
    }

    pub const fn session(&self) -> &UpdateSession {
        &self.session
    }

    pub const fn install_engine(&self) -> &InstallEngine {
        &self.installer
    }

    /// Token that stops the session at the next cancellable point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Run the session to a terminal state.
    ///
    /// Returns the finished session on `Completed`; on `Error` the failure
    /// is returned and also recorded in [`session`](Self::session).
    pub async fn run(&mut self) -> Result<UpdateSession> {
        info!(
            session = %self.session.id,
            "Starting update session at version {}",
            self.options.current_version
        );

        loop {
            let state = self.tracker.current();
            if state.is_terminal() {
                break;
            }

            let cancellation = self.cancellation.clone();
            let outcome = if state == UpdateState::Installing {
                self.step(state).await
            } else {
                tokio::select! {
                    biased;
                    () = cancellation.cancelled() => Err(anyhow!("Update cancelled while {state}")),
                    result = self.step(state) => result,
                }
            };

            match outcome {
                Ok(next) => {
                    self.tracker.transition(next);
                }
                Err(e) => {
                    error!("Update failed while {}: {:#}", state, e);
                    self.session.error = Some(session_error_text(&e));
                    self.tracker.transition(UpdateState::Error);
                    return Err(e);
                }
            }
        }

        Ok(self.session.clone())
    }

    async fn step(&mut self, state: UpdateState) -> Result<UpdateState> {
        match state {
            UpdateState::Idle => Ok(UpdateState::Checking),
            UpdateState::Checking => {
                let info = self.check_for_update().await?;
                if info.available {
                    self.session.update = Some(info);
                    Ok(UpdateState::UpdateAvailable)
                } else {
                    info!("No update available");
                    Ok(UpdateState::Completed)
                }
            }
            UpdateState::UpdateAvailable => Ok(UpdateState::Downloading),
            UpdateState::Downloading => {
                let info = self.pending_update()?;
                let artifact = self.download(&info).await?;
                self.session.artifact = Some(artifact);
                Ok(UpdateState::Installing)
            }
            UpdateState::Installing => {
                let info = self.pending_update()?;
                let artifact = self
                    .session
                    .artifact
                    .clone()
                    .context("No downloaded artifact to install")?;
                self.install(&info, &artifact).await?;
                self.session.installed = true;
                Ok(UpdateState::Completed)
            }
            UpdateState::Completed | UpdateState::Error => Ok(state),
        }
    }

    fn pending_update(&self) -> Result<UpdateInfo> {
        self.session
            .update
            .clone()
            .context("No pending update in this session")
    }

    async fn check_for_update(&self) -> Result<UpdateInfo> {
        let request = CheckRequest {
            resource_id: self.options.resource_id.clone(),
            current_version: self.options.current_version,
            channel: self.options.channel,
            cdk: self.options.cdk.clone(),
        };

        let checker = &self.checker;
        let request = &request;
        self.options
            .retry
            .run("Update check", move || checker.check(request))
            .await
    }

    async fn download(&self, info: &UpdateInfo) -> Result<PathBuf> {
        let dest = self.options.download_dir().join(DOWNLOAD_FILE_NAME);
        let sources = self.rank_sources(&info.sources).await;

        let this = self;
        let sources = sources.as_slice();
        let target = dest.as_path();
        self.options
            .retry
            .run("Download", move || this.fetch_artifact(sources, target))
            .await?;

        if let Some(expected) = &info.sha256 {
            self.downloads.validate_checksum(&dest, expected).await?;
            debug!("Checksum verified for {:?}", dest);
        }
        Ok(dest)
    }

    /// Reorder sources by measured throughput when probing is enabled.
    async fn rank_sources(&self, sources: &[DownloadSource]) -> Vec<DownloadSource> {
        let Some(probe) = self.options.probe.filter(|_| sources.len() > 1) else {
            return sources.to_vec();
        };

        match self
            .downloads
            .test_speeds(sources, probe.byte_budget, probe.timeout)
            .await
        {
            Ok(results) => results
                .into_iter()
                .enumerate()
                .map(|(rank, result)| {
                    debug!(
                        "Source {} ranked {} at {} B/s",
                        result.source.name, rank, result.bytes_per_second
                    );
                    DownloadSource {
                        priority: i32::try_from(rank).unwrap_or(i32::MAX),
                        ..result.source
                    }
                })
                .collect(),
            Err(e) => {
                warn!("Source probing failed, keeping published order: {:#}", e);
                sources.to_vec()
            }
        }
    }

    async fn fetch_artifact(&self, sources: &[DownloadSource], dest: &Path) -> Result<()> {
        let multi_thread = &self.options.multi_thread;
        if multi_thread.effective_threads() > 1 {
            let preferred = crate::download::sources::ordered(sources).into_iter().next();
            if let Some(preferred) = preferred {
                match self
                    .downloads
                    .download_multi_threaded(
                        &preferred.url,
                        dest,
                        multi_thread,
                        self.on_progress.clone(),
                    )
                    .await
                {
                    Ok(()) => return Ok(()),
                    Err(e) => warn!(
                        "Chunked download from {} failed, trying every source: {:#}",
                        preferred.name, e
                    ),
                }
            }
        }

        let used = self
            .downloads
            .download_with_sources(sources, dest, self.on_progress.clone())
            .await?;
        info!("Downloaded update from {}", used.name);
        Ok(())
    }

    async fn install(&self, info: &UpdateInfo, artifact: &Path) -> Result<()> {
        let staging = self.installer.create_temp_dir()?;
        let result = self.install_from(&staging.path, info, artifact).await;

        if let Err(e) = self.installer.cleanup_temp_dir(staging.handle).await {
            warn!("Failed to clean up staging directory: {:#}", e);
        }
        result?;

        let download_dir = self.options.download_dir();
        if let Err(e) = tokio::fs::remove_dir_all(&download_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {:?}: {}", download_dir, e);
            }
        }
        Ok(())
    }

    async fn install_from(&self, staging: &Path, info: &UpdateInfo, artifact: &Path) -> Result<()> {
        let entries = self.installer.extract_zip(artifact, staging).await?;
        debug!("Extracted {} entries to {:?}", entries, staging);

        let manifest = self
            .installer
            .process_changes(&staging.join(CHANGES_MANIFEST))
            .await?;
        let payload = self.plan_payload(staging, manifest).await?;

        let moved = self.release_running_files(&payload).await;
        let applied = match &payload {
            Payload::Installer(installer) => self.run_installer(staging, installer).await,
            Payload::Manifest(manifest) | Payload::FullReplacement(manifest) => {
                self.installer
                    .apply_update(staging, &self.options.install_root, manifest)
                    .await
            }
        };
        if let Err(e) = applied {
            restore_moved_files(&moved).await;
            return Err(e);
        }
        remove_moved_files(&moved).await;

        if let Some(version) = info.new_version {
            let mut marker = VersionFile::load_or_default(&self.options.install_root).await;
            marker.main_version = version.to_version_string();
            marker.save(&self.options.install_root).await?;
        }
        info!(
            "Installed {} into {:?}",
            info.version_name, self.options.install_root
        );
        Ok(())
    }

    async fn plan_payload(&self, staging: &Path, manifest: ChangesManifest) -> Result<Payload> {
        if !manifest.is_empty() {
            debug!("Applying payload from {}", CHANGES_MANIFEST);
            return Ok(Payload::Manifest(manifest));
        }

        if let Some(installer) = &self.options.installer {
            if tokio::fs::try_exists(staging.join(&installer.program))
                .await
                .unwrap_or(false)
            {
                debug!("Applying payload with bundled installer {}", installer.program);
                return Ok(Payload::Installer(installer.clone()));
            }
        }

        let root = staging.to_path_buf();
        let modified = tokio::task::spawn_blocking(move || payload_files(&root))
            .await
            .context("Payload scan task failed")??;
        debug!("Applying payload as full replacement of {} files", modified.len());
        Ok(Payload::FullReplacement(ChangesManifest {
            modified,
            ..ChangesManifest::default()
        }))
    }

    /// Move install-root files that the payload replaces out of the way.
    ///
    /// Failures are logged and do not stop the update.
    async fn release_running_files(&self, payload: &Payload) -> Vec<PathBuf> {
        let patterns: Vec<glob::Pattern> = self
            .options
            .process_patterns
            .iter()
            .filter_map(|pattern| glob::Pattern::new(pattern).ok())
            .collect();
        if patterns.is_empty() {
            return Vec::new();
        }

        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.options.install_root).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan {:?} for running files: {}", self.options.install_root, e);
                return Vec::new();
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.options.self_exe_name.as_deref() == Some(name.as_str()) {
                continue;
            }
            if patterns.iter().any(|p| p.matches(&name)) && payload.touches(&name) {
                names.push(name);
            }
        }
        names.sort();

        let mut moved = Vec::new();
        for name in names {
            match self.installer.handle_running_process(&name).await {
                Ok(RunningFileOutcome::Renamed { old_path }) => moved.push(old_path),
                Ok(RunningFileOutcome::MarkedForDeletion { marker }) => {
                    info!("{} is in use, marked with {:?}", name, marker);
                }
                Ok(RunningFileOutcome::NotPresent) => {}
                Err(e) => warn!("Could not move {} aside: {:#}", name, e),
            }
        }
        moved
    }

    async fn run_installer(&self, staging: &Path, installer: &InstallerConfig) -> Result<()> {
        let program = staging.join(&installer.program);
        let install_dir = self.options.install_root.display().to_string();
        let args: Vec<String> = installer
            .args
            .iter()
            .map(|arg| arg.replace("{install_dir}", &install_dir))
            .collect();

        info!("Running installer {:?} {:?}", program, args);
        let status = tokio::process::Command::new(&program)
            .args(&args)
            .current_dir(staging)
            .status()
            .await
            .map_err(|e| UpdaterError::InstallerFailed {
                program: installer.program.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(UpdaterError::InstallerFailed {
                program: installer.program.clone(),
                reason: format!("exited with {status}"),
            }
            .into());
        }
        Ok(())
    }
}

/// The per-kind message for typed failures, the error chain otherwise.
fn session_error_text(error: &anyhow::Error) -> String {
    UpdaterError::from_anyhow(error)
        .map_or_else(|| format!("{error:#}"), |typed| typed.user_message().to_string())
}

/// Relative `/`-separated paths of every extracted file except the manifest.
fn payload_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to scan payload at {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root)?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if relative != CHANGES_MANIFEST {
            files.push(relative);
        }
    }
    files.sort();
    Ok(files)
}

fn original_path(old_path: &Path) -> Option<PathBuf> {
    let name = old_path.file_name()?.to_string_lossy();
    let original = name.strip_suffix(OLD_FILE_SUFFIX)?;
    Some(old_path.with_file_name(original))
}

async fn restore_moved_files(moved: &[PathBuf]) {
    for old_path in moved {
        let Some(original) = original_path(old_path) else {
            continue;
        };
        if tokio::fs::try_exists(&original).await.unwrap_or(false) {
            continue;
        }
        match tokio::fs::rename(old_path, &original).await {
            Ok(()) => debug!("Restored {:?}", original),
            Err(e) => warn!("Failed to restore {:?} from {:?}: {}", original, old_path, e),
        }
    }
}

/// The moved-aside copies are still open on some platforms; failing to
/// remove them is expected there.
async fn remove_moved_files(moved: &[PathBuf]) {
    for old_path in moved {
        if let Err(e) = tokio::fs::remove_file(old_path).await {
            debug!("Leaving {:?} in place: {}", old_path, e);
        }
    }
}
