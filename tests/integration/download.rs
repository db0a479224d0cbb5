//! Single-stream downloads: fresh, resumed, progress and failure modes.

use crate::common::TestServer;
use app_updater::core::UpdaterError;
use app_updater::download::{DownloadEngine, DownloadProgress, ProgressCallback};
use app_updater::test_utils::{pattern_bytes, sha256_hex};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn engine() -> DownloadEngine {
    DownloadEngine::new("app-updater-tests").unwrap()
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<DownloadProgress>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
    (callback, seen)
}

fn typed(err: &anyhow::Error) -> UpdaterError {
    UpdaterError::from_anyhow(err)
        .cloned()
        .unwrap_or_else(|| panic!("untyped error: {err:#}"))
}

#[tokio::test]
async fn test_download_writes_exact_bytes() {
    let data = pattern_bytes(300_000);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("nested/dir/update.zip");

    engine()
        .download(&server.url("/files/artifact"), &dest, None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn test_download_replaces_existing_file() {
    let data = pattern_bytes(1000);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("update.zip");
    std::fs::write(&dest, vec![0xAA; 5000]).unwrap();

    engine()
        .download(&server.url("/files/artifact"), &dest, None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn test_progress_is_throttled_monotonic_and_ends_at_100() {
    // 20 chunks, 50 ms apart
    let data = pattern_bytes(20 * 1024);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let (callback, seen) = recorder();

    let started = std::time::Instant::now();
    engine()
        .download(
            &server.url("/slow/artifact"),
            &temp.path().join("out.bin"),
            Some(callback),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    let seen = seen.lock().unwrap();
    let last = seen.last().expect("final snapshot");
    assert_eq!(last.bytes_downloaded, data.len() as u64);
    assert!((last.percentage - 100.0).abs() < f64::EPSILON);
    assert!(seen.len() >= 2, "expected intermediate snapshots, got {}", seen.len());
    let allowed = usize::try_from(elapsed.as_millis() / 100).unwrap() + 1;
    assert!(seen.len() <= allowed, "{} snapshots in {:?}", seen.len(), elapsed);
    assert!(seen.windows(2).all(|w| w[0].bytes_downloaded <= w[1].bytes_downloaded));
    assert!(seen.iter().all(|p| p.bytes_downloaded <= data.len() as u64));
}

#[tokio::test]
async fn test_unknown_length_still_reports_completion() {
    let data = pattern_bytes(10_000);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");
    let (callback, seen) = recorder();

    engine()
        .download(&server.url("/streamed/artifact"), &dest, Some(callback))
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), data);
    let seen = seen.lock().unwrap();
    let last = seen.last().unwrap();
    assert_eq!(last.total_bytes, None);
    assert!((last.percentage - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_http_error_status() {
    let server = TestServer::start().await;
    let temp = TempDir::new().unwrap();

    let err = engine()
        .download(&server.url("/fail"), &temp.path().join("out.bin"), None)
        .await
        .unwrap_err();
    assert!(matches!(typed(&err), UpdaterError::HttpStatus { status: 500, .. }));

    let err = engine()
        .download(&server.url("/files/missing"), &temp.path().join("out.bin"), None)
        .await
        .unwrap_err();
    assert!(matches!(typed(&err), UpdaterError::HttpStatus { status: 404, .. }));
}

#[tokio::test]
async fn test_timeout_applies_to_requests() {
    let server = TestServer::start().await;
    let temp = TempDir::new().unwrap();
    let engine = engine();
    engine.set_timeout(Duration::from_millis(300));

    let err = engine
        .download(&server.url("/hang"), &temp.path().join("out.bin"), None)
        .await
        .unwrap_err();
    assert!(matches!(typed(&err), UpdaterError::Timeout { .. }));
}

#[tokio::test]
async fn test_resume_appends_remaining_bytes() {
    let data = pattern_bytes(100_000);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("partial.bin");
    std::fs::write(&dest, &data[..40_000]).unwrap();
    let (callback, seen) = recorder();

    engine()
        .download_with_resume(&server.url("/files/artifact"), &dest, Some(callback))
        .await
        .unwrap();

    let written = std::fs::read(&dest).unwrap();
    assert_eq!(sha256_hex(&written), sha256_hex(&data));
    let seen = seen.lock().unwrap();
    assert!(seen.iter().all(|p| p.bytes_downloaded >= 40_000));
    assert_eq!(seen.last().unwrap().total_bytes, Some(100_000));
}

#[tokio::test]
async fn test_resume_without_partial_file_is_a_fresh_download() {
    let data = pattern_bytes(5_000);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("fresh.bin");

    engine()
        .download_with_resume(&server.url("/files/artifact"), &dest, None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn test_resume_against_server_without_ranges_leaves_file_untouched() {
    let data = pattern_bytes(20_000);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("partial.bin");
    std::fs::write(&dest, &data[..5_000]).unwrap();

    let err = engine()
        .download_with_resume(&server.url("/no-range/artifact"), &dest, None)
        .await
        .unwrap_err();

    assert!(matches!(typed(&err), UpdaterError::RangeNotHonored { .. }));
    assert_eq!(std::fs::read(&dest).unwrap(), &data[..5_000]);
}

#[tokio::test]
async fn test_resume_with_mismatched_content_range_leaves_file_untouched() {
    let data = pattern_bytes(20_000);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("partial.bin");
    std::fs::write(&dest, &data[..5_000]).unwrap();

    let err = engine()
        .download_with_resume(&server.url("/misranged/artifact"), &dest, None)
        .await
        .unwrap_err();

    assert!(matches!(typed(&err), UpdaterError::RangeNotHonored { .. }));
    assert_eq!(std::fs::read(&dest).unwrap(), &data[..5_000]);
}

#[tokio::test]
async fn test_resume_of_complete_file_is_rejected_by_server() {
    let data = pattern_bytes(1_000);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("complete.bin");
    std::fs::write(&dest, &data).unwrap();

    let err = engine()
        .download_with_resume(&server.url("/files/artifact"), &dest, None)
        .await
        .unwrap_err();

    assert!(matches!(typed(&err), UpdaterError::HttpStatus { status: 416, .. }));
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn test_validate_checksum_after_download() {
    let data = pattern_bytes(4_096);
    let server = TestServer::with_artifact(data.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");
    let engine = engine();

    engine
        .download(&server.url("/files/artifact"), &dest, None)
        .await
        .unwrap();
    engine
        .validate_checksum(&dest, &sha256_hex(&data).to_uppercase())
        .await
        .unwrap();

    let err = engine
        .validate_checksum(&dest, &sha256_hex(b"something else"))
        .await
        .unwrap_err();
    assert!(matches!(typed(&err), UpdaterError::ChecksumMismatch { .. }));
}
