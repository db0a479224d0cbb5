//! Release version parsing, ordering and the version marker.

use app_updater::core::UpdaterError;
use app_updater::version::{Channel, ReleaseVersion, VersionFile};
use tempfile::TempDir;

fn v(s: &str) -> ReleaseVersion {
    s.parse().unwrap()
}

#[test]
fn both_spellings_parse_to_the_same_version() {
    assert_eq!(v("4.4.1.3"), v("v4.4.1-beta3"));
    assert_eq!(v("4.4.1.3"), v("v4.4.1-beta.3"));
    assert_eq!(v("4.4.1.0"), v("v4.4.1"));
    assert_eq!(v("V2.0.0"), ReleaseVersion::new(2, 0, 0, 0));
}

#[test]
fn betas_sort_before_their_stable_release() {
    let mut versions = vec![
        v("v4.4.2-beta1"),
        v("v4.4.1"),
        v("4.4.1.2"),
        v("v4.4.1-beta10"),
        v("4.3.9.0"),
    ];
    versions.sort();
    let labels: Vec<_> = versions.iter().map(ReleaseVersion::to_display).collect();
    assert_eq!(
        labels,
        ["v4.3.9", "v4.4.1-beta2", "v4.4.1-beta10", "v4.4.1", "v4.4.2-beta1"]
    );
}

#[test]
fn newer_than_is_strict() {
    assert!(v("v1.0.1").is_newer_than(&v("1.0.0.0")));
    assert!(v("v1.0.0").is_newer_than(&v("v1.0.0-beta5")));
    assert!(!v("1.0.0.0").is_newer_than(&v("v1.0.0")));
    assert!(!v("v0.9.9").is_newer_than(&v("v1.0.0-beta1")));
}

#[test]
fn channel_follows_beta_number() {
    assert_eq!(v("v3.0.0-beta2").channel(), Channel::Beta);
    assert_eq!(v("v3.0.0").channel(), Channel::Stable);
    assert_eq!("BETA".parse::<Channel>().unwrap(), Channel::Beta);
    assert!(matches!(
        "nightly".parse::<Channel>(),
        Err(UpdaterError::Config { .. })
    ));
}

#[test]
fn malformed_versions_are_rejected() {
    for input in ["", "1.2", "1.2.3.4.5", "v1.2.3-rc1", "v1.2.3-beta0", "a.b.c.d", "1..2.3"] {
        assert!(
            matches!(
                input.parse::<ReleaseVersion>(),
                Err(UpdaterError::InvalidVersion { .. })
            ),
            "{input:?} was accepted"
        );
    }
}

#[test]
fn four_part_string_is_stable_form() {
    assert_eq!(v("v4.4.1-beta3").to_version_string(), "4.4.1.3");
    assert_eq!(ReleaseVersion::default().to_version_string(), "0.0.0.0");
}

#[tokio::test]
async fn version_marker_keeps_unknown_fields() {
    let root = TempDir::new().unwrap();
    let path = VersionFile::path_in(root.path());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{"main_version": "1.0.0.0", "version_info": {"build": 7}, "vendor": "acme"}"#,
    )
    .unwrap();

    let mut marker = VersionFile::load_or_default(root.path()).await;
    assert_eq!(marker.version().unwrap(), ReleaseVersion::new(1, 0, 0, 0));
    marker.main_version = "1.1.0.0".to_string();
    marker.save(root.path()).await.unwrap();

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["main_version"], "1.1.0.0");
    assert_eq!(saved["version_info"]["build"], 7);
    assert_eq!(saved["vendor"], "acme");
}

#[tokio::test]
async fn missing_marker_defaults_to_zero() {
    let root = TempDir::new().unwrap();
    let marker = VersionFile::load_or_default(root.path()).await;
    assert_eq!(marker.version().unwrap(), ReleaseVersion::default());
}
