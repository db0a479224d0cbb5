//! Error classification and user-facing rendering.

use anyhow::Context;
use app_updater::core::{ErrorKind, UpdaterError, user_friendly_error};

#[test]
fn transport_failures_are_network_errors() {
    let errors = [
        UpdaterError::Timeout {
            url: "http://x".into(),
        },
        UpdaterError::HttpStatus {
            url: "http://x".into(),
            status: 503,
        },
        UpdaterError::RangeNotHonored {
            url: "http://x".into(),
        },
        UpdaterError::IncompleteTransfer {
            url: "http://x".into(),
            expected: 10,
            received: 4,
        },
        UpdaterError::NoSources,
        UpdaterError::AllSourcesFailed { failures: vec![] },
    ];
    for error in errors {
        assert_eq!(error.kind(), ErrorKind::Network, "{error}");
    }
}

#[test]
fn every_kind_has_a_message() {
    let samples = [
        UpdaterError::ChecksumMismatch {
            path: "a".into(),
            expected: "00".into(),
            actual: "11".into(),
        },
        UpdaterError::PathTraversal {
            entry: "../x".into(),
        },
        UpdaterError::Manifest {
            path: "changes.json".into(),
            reason: "bad".into(),
        },
        UpdaterError::Api {
            reason: "code 1".into(),
        },
        UpdaterError::Config {
            reason: "bad".into(),
        },
    ];
    let kinds: Vec<_> = samples.iter().map(UpdaterError::kind).collect();
    assert_eq!(
        kinds,
        [
            ErrorKind::Integrity,
            ErrorKind::Archive,
            ErrorKind::Manifest,
            ErrorKind::Api,
            ErrorKind::Config,
        ]
    );
    for error in &samples {
        assert!(!error.user_message().is_empty());
    }
}

#[test]
fn typed_error_is_found_under_context() {
    let err = Err::<(), _>(UpdaterError::NoSources)
        .context("downloading update")
        .unwrap_err();
    assert!(matches!(
        UpdaterError::from_anyhow(&err),
        Some(UpdaterError::NoSources)
    ));
    assert!(UpdaterError::from_anyhow(&anyhow::anyhow!("plain")).is_none());
}

#[test]
fn friendly_error_keeps_context_chain_as_details() {
    let err = Err::<(), _>(UpdaterError::HttpStatus {
        url: "http://x/update.zip".into(),
        status: 404,
    })
    .context("downloading update")
    .unwrap_err();

    let rendered = user_friendly_error(err).to_string();
    assert!(rendered.contains("HTTP 404"), "{rendered}");
    assert!(rendered.contains("downloading update"), "{rendered}");
}
