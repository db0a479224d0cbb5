//! Full update sessions against the local test server.

use crate::common::TestServer;
use anyhow::Result;
use app_updater::config::InstallerConfig;
use app_updater::core::UpdaterError;
use app_updater::download::{DownloadEngine, DownloadSource};
use app_updater::test_utils::{ZipFixture, init_test_logging, sha256_hex};
use app_updater::update::{
    CheckRequest, MirrorClient, StateEvent, StateObserver, UpdateChecker, UpdateInfo,
    UpdateMachine, UpdateOptions, UpdateState,
};
use app_updater::utils::RetryPolicy;
use app_updater::version::{ReleaseVersion, VersionFile};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const CURRENT: ReleaseVersion = ReleaseVersion::new(1, 0, 0, 0);

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_delay_ms: 10,
        max_delay_ms: 20,
        backoff_factor: 2,
        ..RetryPolicy::default()
    }
}

fn options(root: &Path) -> UpdateOptions {
    init_test_logging(None);
    UpdateOptions {
        retry: fast_retry(),
        ..UpdateOptions::new(root, CURRENT)
    }
}

fn mirror_client(server: &TestServer) -> MirrorClient {
    MirrorClient::new(server.api_base(), "app-updater-tests", Vec::new(), Duration::from_secs(5))
        .unwrap()
}

fn downloads() -> DownloadEngine {
    DownloadEngine::new("app-updater-tests").unwrap()
}

fn record_states<C: UpdateChecker>(machine: &UpdateMachine<C>) -> Arc<Mutex<Vec<UpdateState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let observer: Arc<dyn StateObserver> =
        Arc::new(move |event: &StateEvent| sink.lock().unwrap().push(event.current));
    machine.add_observer(observer);
    states
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

/// Register `archive` on the server and offer it as `version_name`.
fn publish(server: &TestServer, version_name: &str, archive: Vec<u8>) {
    let sha256 = sha256_hex(&archive);
    server.add_file("release.zip", archive);
    server.offer_update(version_name, &server.url("/files/release.zip"), Some(&sha256));
}

#[tokio::test]
async fn test_manifest_update_completes() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();
    write(root.path(), "app.bin", "v1");
    write(root.path(), "old.dat", "obsolete");
    write(root.path(), "user.cfg", "mine");

    publish(
        &server,
        "v1.2.0",
        ZipFixture::new()
            .file("app.bin", "v2")
            .file("assets/logo.png", "logo")
            .manifest(&["assets/logo.png"], &["app.bin"], &["old.dat"])
            .build(),
    );

    let mut machine = UpdateMachine::new(mirror_client(&server), downloads(), options(root.path()));
    let states = record_states(&machine);
    let session = machine.run().await.unwrap();

    assert_eq!(machine.state(), UpdateState::Completed);
    assert_eq!(
        *states.lock().unwrap(),
        [
            UpdateState::Checking,
            UpdateState::UpdateAvailable,
            UpdateState::Downloading,
            UpdateState::Installing,
            UpdateState::Completed,
        ]
    );
    assert!(session.installed);
    assert_eq!(session.new_version(), Some(ReleaseVersion::new(1, 2, 0, 0)));
    assert!(session.error.is_none());

    assert_eq!(read(root.path(), "app.bin"), "v2");
    assert_eq!(read(root.path(), "assets/logo.png"), "logo");
    assert_eq!(read(root.path(), "user.cfg"), "mine");
    assert!(!root.path().join("old.dat").exists());
    assert!(!root.path().join("UPDATE_TEMP").exists());

    let marker = VersionFile::load_or_default(root.path()).await;
    assert_eq!(marker.main_version, "1.2.0.0");
    assert_eq!(machine.install_engine().tracked_temp_dirs(), 0);

    let query = server.last_query().unwrap();
    assert!(query.contains("current_version=1.0.0.0"), "{query}");
    assert!(query.contains("channel=stable"), "{query}");
}

#[tokio::test]
async fn test_up_to_date_goes_straight_to_completed() {
    let server = TestServer::start().await;
    server.offer_update("v1.0.0", &server.url("/files/none.zip"), None);
    let root = TempDir::new().unwrap();

    let mut machine = UpdateMachine::new(mirror_client(&server), downloads(), options(root.path()));
    let states = record_states(&machine);
    let session = machine.run().await.unwrap();

    assert_eq!(
        *states.lock().unwrap(),
        [UpdateState::Checking, UpdateState::Completed]
    );
    assert!(!session.installed);
    assert!(session.update.is_none());
    assert_eq!(server.hits("/files/none.zip"), 0);
    assert!(!root.path().join("UPDATE_TEMP").exists());
}

#[tokio::test]
async fn test_checksum_mismatch_ends_in_error_without_touching_files() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();
    write(root.path(), "app.bin", "v1");

    let archive = ZipFixture::new()
        .file("app.bin", "v2")
        .manifest(&[], &["app.bin"], &[])
        .build();
    server.add_file("release.zip", archive);
    server.offer_update(
        "v2.0.0",
        &server.url("/files/release.zip"),
        Some(&sha256_hex(b"a different artifact")),
    );

    let mut machine = UpdateMachine::new(mirror_client(&server), downloads(), options(root.path()));
    let states = record_states(&machine);
    let err = machine.run().await.unwrap_err();

    assert!(matches!(
        UpdaterError::from_anyhow(&err),
        Some(UpdaterError::ChecksumMismatch { .. })
    ));
    assert_eq!(machine.state(), UpdateState::Error);
    assert_eq!(states.lock().unwrap().last(), Some(&UpdateState::Error));
    assert!(!states.lock().unwrap().contains(&UpdateState::Installing));
    assert!(machine.session().error.is_some());
    assert_eq!(read(root.path(), "app.bin"), "v1");
    assert!(!root.path().join("resources/version.json").exists());
}

/// Fails with a network error a fixed number of times, then offers an update.
struct FlakyChecker {
    failures_left: AtomicUsize,
    info: UpdateInfo,
}

impl UpdateChecker for FlakyChecker {
    async fn check(&self, _request: &CheckRequest) -> Result<UpdateInfo> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(UpdaterError::Timeout {
                url: "http://update.invalid/latest".to_string(),
            }
            .into());
        }
        Ok(self.info.clone())
    }
}

#[tokio::test]
async fn test_check_is_retried_after_network_failure() {
    let server = TestServer::start().await;
    let archive = ZipFixture::new().file("app.bin", "v3").build();
    let sha256 = sha256_hex(&archive);
    server.add_file("release.zip", archive);
    let root = TempDir::new().unwrap();
    write(root.path(), "app.bin", "v1");

    let checker = FlakyChecker {
        failures_left: AtomicUsize::new(1),
        info: UpdateInfo {
            available: true,
            new_version: Some(ReleaseVersion::new(3, 0, 0, 0)),
            version_name: "v3.0.0".to_string(),
            sources: vec![DownloadSource::new("primary", server.url("/files/release.zip"), 0)],
            sha256: Some(sha256),
            ..UpdateInfo::default()
        },
    };

    let mut machine = UpdateMachine::new(checker, downloads(), options(root.path()));
    machine.run().await.unwrap();

    assert_eq!(machine.state(), UpdateState::Completed);
    assert_eq!(read(root.path(), "app.bin"), "v3");
}

#[tokio::test]
async fn test_check_gives_up_after_retry_budget() {
    let root = TempDir::new().unwrap();
    let checker = FlakyChecker {
        failures_left: AtomicUsize::new(10),
        info: UpdateInfo::default(),
    };

    let mut machine = UpdateMachine::new(checker, downloads(), options(root.path()));
    let err = machine.run().await.unwrap_err();

    assert!(matches!(
        UpdaterError::from_anyhow(&err),
        Some(UpdaterError::Timeout { .. })
    ));
    assert_eq!(machine.state(), UpdateState::Error);
}

#[tokio::test]
async fn test_failing_primary_falls_back_to_mirror_source() {
    let server = TestServer::start().await;
    let archive = ZipFixture::new().file("app.bin", "from mirror").build();
    let sha256 = sha256_hex(&archive);
    server.add_file("release.zip", archive);
    let root = TempDir::new().unwrap();

    let checker = FlakyChecker {
        failures_left: AtomicUsize::new(0),
        info: UpdateInfo {
            available: true,
            new_version: Some(ReleaseVersion::new(1, 1, 0, 0)),
            version_name: "v1.1.0".to_string(),
            sources: vec![
                DownloadSource::new("primary", server.url("/files/gone.zip"), 0),
                DownloadSource::new("mirror", server.url("/no-range/release.zip"), 1),
            ],
            sha256: Some(sha256),
            ..UpdateInfo::default()
        },
    };

    let mut machine = UpdateMachine::new(checker, downloads(), options(root.path()));
    machine.run().await.unwrap();

    assert_eq!(read(root.path(), "app.bin"), "from mirror");
    assert!(server.hits("/files/gone.zip") >= 1);
}

#[tokio::test]
async fn test_payload_without_manifest_replaces_every_file() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();
    write(root.path(), "app.bin", "v1");
    write(root.path(), "lib/core.so", "core v1");
    write(root.path(), "user.cfg", "mine");

    publish(
        &server,
        "v1.0.1",
        ZipFixture::new()
            .file("app.bin", "v1.0.1")
            .file("lib/core.so", "core v1.0.1")
            .file("lib/extra.so", "extra")
            .build(),
    );

    let mut machine = UpdateMachine::new(mirror_client(&server), downloads(), options(root.path()));
    machine.run().await.unwrap();

    assert_eq!(read(root.path(), "app.bin"), "v1.0.1");
    assert_eq!(read(root.path(), "lib/core.so"), "core v1.0.1");
    assert_eq!(read(root.path(), "lib/extra.so"), "extra");
    assert_eq!(read(root.path(), "user.cfg"), "mine");
}

#[tokio::test]
async fn test_running_executable_is_replaced_and_old_copy_removed() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();
    write(root.path(), "app.exe", "running v1");
    write(root.path(), "helper.exe", "helper v1");

    publish(
        &server,
        "v1.1.0",
        ZipFixture::new()
            .file("app.exe", "v1.1")
            .manifest(&[], &["app.exe"], &[])
            .build(),
    );

    let mut machine = UpdateMachine::new(
        mirror_client(&server),
        downloads(),
        UpdateOptions {
            process_patterns: vec!["*.exe".to_string()],
            ..options(root.path())
        },
    );
    machine.run().await.unwrap();

    assert_eq!(read(root.path(), "app.exe"), "v1.1");
    assert_eq!(read(root.path(), "helper.exe"), "helper v1");
    assert!(!root.path().join("app.exe.old").exists());
    assert!(!root.path().join("helper.exe.old").exists());
}

#[tokio::test]
async fn test_failed_install_puts_running_executable_back() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();
    write(root.path(), "app.exe", "running v1");
    // A directory where the payload has a file makes the apply fail
    write(root.path(), "blocker/inner.txt", "keep");

    publish(
        &server,
        "v1.1.0",
        ZipFixture::new()
            .file("app.exe", "v1.1")
            .file("blocker", "file")
            .manifest(&[], &["app.exe", "blocker"], &[])
            .build(),
    );

    let mut machine = UpdateMachine::new(
        mirror_client(&server),
        downloads(),
        UpdateOptions {
            process_patterns: vec!["*.exe".to_string()],
            ..options(root.path())
        },
    );
    let err = machine.run().await.unwrap_err();

    assert!(matches!(
        UpdaterError::from_anyhow(&err),
        Some(UpdaterError::RolledBack { .. })
    ));
    assert_eq!(machine.state(), UpdateState::Error);
    assert_eq!(read(root.path(), "app.exe"), "running v1");
    assert!(!root.path().join("app.exe.old").exists());
    assert!(!root.path().join("resources/version.json").exists());
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial(processes)]
async fn test_bundled_installer_runs_with_install_dir() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();

    publish(
        &server,
        "v2.0.0",
        ZipFixture::new()
            .file_with_mode(
                "setup.sh",
                "#!/bin/sh\necho \"installed $2\" > \"$1/installed.txt\"\n",
                0o755,
            )
            .build(),
    );

    let mut machine = UpdateMachine::new(
        mirror_client(&server),
        downloads(),
        UpdateOptions {
            installer: Some(InstallerConfig {
                program: "setup.sh".to_string(),
                args: vec!["{install_dir}".to_string(), "quietly".to_string()],
            }),
            ..options(root.path())
        },
    );
    machine.run().await.unwrap();

    assert_eq!(read(root.path(), "installed.txt").trim(), "installed quietly");
    assert!(!root.path().join("setup.sh").exists());
    let marker = VersionFile::load_or_default(root.path()).await;
    assert_eq!(marker.version().unwrap(), ReleaseVersion::new(2, 0, 0, 0));
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial(processes)]
async fn test_failing_installer_is_an_error() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();

    publish(
        &server,
        "v2.0.0",
        ZipFixture::new()
            .file_with_mode("setup.sh", "#!/bin/sh\nexit 3\n", 0o755)
            .build(),
    );

    let mut machine = UpdateMachine::new(
        mirror_client(&server),
        downloads(),
        UpdateOptions {
            installer: Some(InstallerConfig {
                program: "setup.sh".to_string(),
                args: Vec::new(),
            }),
            ..options(root.path())
        },
    );
    let err = machine.run().await.unwrap_err();

    assert!(matches!(
        UpdaterError::from_anyhow(&err),
        Some(UpdaterError::InstallerFailed { .. })
    ));
    assert!(!root.path().join("resources/version.json").exists());
}

#[tokio::test]
async fn test_watch_channel_sees_terminal_state() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();
    let mut machine = UpdateMachine::new(mirror_client(&server), downloads(), options(root.path()));
    let receiver = machine.subscribe();
    assert_eq!(*receiver.borrow(), UpdateState::Idle);

    machine.run().await.unwrap();

    assert_eq!(*receiver.borrow(), UpdateState::Completed);
}

/// Cancel `machine`'s token as soon as it enters `state`.
fn cancel_on<C: UpdateChecker>(machine: &UpdateMachine<C>, state: UpdateState) {
    let token = machine.cancellation_token();
    let observer: Arc<dyn StateObserver> = Arc::new(move |event: &StateEvent| {
        if event.current == state {
            token.cancel();
        }
    });
    machine.add_observer(observer);
}

#[tokio::test]
async fn test_cancel_during_install_lets_install_finish() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();
    let mut fixture = ZipFixture::new();
    let mut modified = Vec::new();
    for i in 0..200 {
        let name = format!("data/f{i:04}.txt");
        write(root.path(), &name, "old");
        fixture = fixture.file(&name, "new");
        modified.push(name);
    }
    let modified: Vec<&str> = modified.iter().map(String::as_str).collect();
    publish(&server, "v1.2.0", fixture.manifest(&[], &modified, &[]).build());

    let mut machine = UpdateMachine::new(mirror_client(&server), downloads(), options(root.path()));
    let states = record_states(&machine);
    cancel_on(&machine, UpdateState::Installing);
    let session = machine.run().await.unwrap();

    assert!(machine.cancellation_token().is_cancelled());
    assert!(session.installed);
    assert_eq!(states.lock().unwrap().last(), Some(&UpdateState::Completed));
    for name in &modified {
        assert_eq!(read(root.path(), name), "new", "{name}");
    }
    let leftovers: Vec<_> = fs::read_dir(root.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".backup_"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_cancel_before_install_leaves_root_untouched() {
    let server = TestServer::start().await;
    let root = TempDir::new().unwrap();
    write(root.path(), "app.bin", "v1");
    publish(
        &server,
        "v1.2.0",
        ZipFixture::new()
            .file("app.bin", "v2")
            .manifest(&[], &["app.bin"], &[])
            .build(),
    );

    let mut machine = UpdateMachine::new(mirror_client(&server), downloads(), options(root.path()));
    let states = record_states(&machine);
    cancel_on(&machine, UpdateState::Downloading);
    let err = machine.run().await.unwrap_err();

    assert!(err.to_string().contains("cancelled"), "{err:#}");
    assert_eq!(machine.state(), UpdateState::Error);
    assert!(!states.lock().unwrap().contains(&UpdateState::Installing));
    assert!(machine.session().error.is_some());
    assert_eq!(read(root.path(), "app.bin"), "v1");
    assert!(!root.path().join("resources/version.json").exists());
}
