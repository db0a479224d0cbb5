//! Updater configuration.
//!
//! The configuration is a TOML file, by default at
//! `<config dir>/app-updater/config.toml` (`~/.config` on Linux,
//! `~/Library/Application Support` on macOS, `%APPDATA%` on Windows). A
//! missing file is created with defaults on first run; `--config` points the
//! CLI at another file.
//!
//! ```toml
//! resource_id = "MyApp"
//! channel = "stable"            # or "beta"
//! api_base_url = "https://mirrorchyan.com/api/resources"
//! install_root = "~/Applications/MyApp"
//! log_level = "info"
//!
//! [download]
//! timeout_secs = 300
//! threads = 4                   # 1 disables chunked downloads
//! chunk_size = 0                # 0 splits evenly across threads
//! probe_sources = false
//!
//! [[mirrors]]
//! name = "official"
//! url_template = "https://dl.example.com/MyApp_{version}.zip"
//! priority = 10
//!
//! [install]
//! process_patterns = ["*.exe"]
//!
//! [install.installer]
//! program = "MyApp-Setup.exe"
//! args = ["/SILENT", "/DIR={install_dir}"]
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! backoff_factor = 2
//! ```

mod updater;

pub use updater::{DownloadSettings, InstallSettings, InstallerConfig, MirrorConfig, UpdaterConfig};
