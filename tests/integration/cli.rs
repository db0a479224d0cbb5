//! The `app-updater` binary.
//!
//! Commands that talk to the test server run on a blocking thread so the
//! server keeps answering while the child process waits.

use crate::common::TestServer;
use assert_cmd::Command;
use assert_cmd::assert::OutputAssertExt;
use app_updater::test_utils::{ZipFixture, pattern_bytes, sha256_hex};
use predicates::prelude::*;
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::process::Output;
use tempfile::TempDir;

fn updater() -> Command {
    let mut cmd = Command::cargo_bin("app-updater").unwrap();
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

async fn output_of(mut cmd: Command) -> Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

fn write_config(dir: &Path, server: &TestServer) -> std::path::PathBuf {
    let path = dir.join("updater.toml");
    fs::write(
        &path,
        format!(
            r#"resource_id = "demo"
api_base_url = "{}"
log_level = "warn"

[download]
threads = 1

[retry]
max_retries = 0
"#,
            server.api_base()
        ),
    )
    .unwrap();
    path
}

#[test]
#[serial(processes)]
fn test_help_lists_commands() {
    updater()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("cleanup"));
}

#[test]
#[serial(processes)]
fn test_quiet_and_verbose_conflict() {
    updater()
        .args(["-q", "-v", "cleanup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
#[serial(processes)]
fn test_verify_matching_checksum() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("payload.bin");
    fs::write(&file, b"payload").unwrap();

    updater()
        .arg("verify")
        .arg(&file)
        .arg(sha256_hex(b"payload").to_uppercase())
        .assert()
        .success()
        .stdout(predicate::str::contains("Checksum matches"));
}

#[test]
#[serial(processes)]
fn test_verify_mismatch_exits_with_error() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("payload.bin");
    fs::write(&file, b"payload").unwrap();

    updater()
        .arg("verify")
        .arg(&file)
        .arg(sha256_hex(b"other"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error"));
}

#[test]
#[serial(processes)]
fn test_cleanup_processes_markers() {
    let temp = TempDir::new().unwrap();
    let stale = temp.path().join("app.exe.old");
    fs::write(&stale, "old binary").unwrap();
    fs::write(
        temp.path().join("app.exe.old.delete_on_restart"),
        stale.display().to_string(),
    )
    .unwrap();
    fs::create_dir_all(temp.path().join("UPDATE_TEMP")).unwrap();
    fs::write(temp.path().join("UPDATE_TEMP/update.zip"), "partial").unwrap();

    updater()
        .arg("cleanup")
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 deferred file"));

    assert!(!stale.exists());
    assert!(!temp.path().join("app.exe.old.delete_on_restart").exists());
    assert!(!temp.path().join("UPDATE_TEMP").exists());
}

#[tokio::test]
#[serial(processes)]
async fn test_download_with_checksum() {
    let data = pattern_bytes(200_000);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");

    let mut cmd = updater();
    cmd.args(["--no-progress", "download"])
        .arg(server.url("/files/artifact"))
        .arg(&dest)
        .args(["--threads", "3", "--sha256", &sha256_hex(&data)]);
    output_of(cmd)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved"));

    assert_eq!(fs::read(&dest).unwrap(), data);
}

#[tokio::test]
#[serial(processes)]
async fn test_download_http_error_exits_with_error() {
    let server = TestServer::start().await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");

    let mut cmd = updater();
    cmd.args(["--no-progress", "download"])
        .arg(server.url("/fail"))
        .arg(&dest);
    output_of(cmd)
        .await
        .assert()
        .code(1)
        .stderr(predicate::str::contains("500"));

    assert!(!dest.exists());
}

#[tokio::test]
#[serial(processes)]
async fn test_check_json_reports_available_update() {
    let server = TestServer::start().await;
    server.offer_update("v1.2.0", &server.url("/files/release.zip"), None);
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), &server);

    let mut cmd = updater();
    cmd.arg("--config")
        .arg(&config)
        .args(["check", "--json", "--current-version", "1.0.0.0", "--install-root"])
        .arg(temp.path());
    let output = output_of(cmd).await;
    let output = output.assert().success().get_output().clone();

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["available"], true);
    assert_eq!(value["current_version"], "1.0.0.0");
    assert_eq!(value["new_version"], "1.2.0.0");
    assert_eq!(value["channel"], "stable");
    assert!(server.last_query().unwrap().contains("current_version=1.0.0.0"));
}

#[tokio::test]
#[serial(processes)]
async fn test_run_installs_update() {
    let server = TestServer::start().await;
    let archive = ZipFixture::new()
        .file("app.bin", "v2")
        .manifest(&[], &["app.bin"], &[])
        .build();
    let sha256 = sha256_hex(&archive);
    server.add_file("release.zip", archive);
    server.offer_update("v1.2.0", &server.url("/files/release.zip"), Some(&sha256));

    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), &server);
    let root = temp.path().join("app");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("app.bin"), "v1").unwrap();

    let mut cmd = updater();
    cmd.arg("--config")
        .arg(&config)
        .args(["--no-progress", "run", "--current-version", "1.0.0.0", "--install-root"])
        .arg(&root);
    output_of(cmd)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated v1.0.0 -> v1.2.0"));

    assert_eq!(fs::read_to_string(root.join("app.bin")).unwrap(), "v2");
    let marker = fs::read_to_string(root.join("resources/version.json")).unwrap();
    assert!(marker.contains("1.2.0.0"));
    assert!(!root.join("UPDATE_TEMP").exists());
    assert!(!root.join(".app-updater.lock").exists());
}

#[tokio::test]
#[serial(processes)]
async fn test_run_reports_up_to_date() {
    let server = TestServer::start().await;
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), &server);

    let mut cmd = updater();
    cmd.arg("--config")
        .arg(&config)
        .args(["run", "--current-version", "3.1.0.0", "--install-root"])
        .arg(temp.path());
    output_of(cmd)
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("v3.1.0 is up to date"));
}
