//! The update state machine and its collaborators.
//!
//! [`UpdateMachine`] walks one session through
//! `Idle -> Checking -> UpdateAvailable -> Downloading -> Installing` and
//! ends in `Completed` or `Error`. It asks an [`UpdateChecker`] (normally
//! [`MirrorClient`]) whether a newer release exists, fetches it with the
//! [`DownloadEngine`](crate::download::DownloadEngine) and hands it to the
//! [`InstallEngine`](crate::install::InstallEngine).
//!
//! State changes can be polled, watched through a `tokio::sync::watch`
//! receiver, or delivered to [`StateObserver`]s:
//!
//! ```rust,no_run
//! use app_updater::download::DownloadEngine;
//! use app_updater::update::{MirrorClient, UpdateMachine, UpdateOptions, StateEvent};
//! use app_updater::version::ReleaseVersion;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let checker = MirrorClient::new(
//!     "https://updates.example.com/api/resources",
//!     "app-updater",
//!     Vec::new(),
//!     std::time::Duration::from_secs(30),
//! )?;
//! let options = UpdateOptions::new("/opt/demo", ReleaseVersion::new(1, 0, 0, 0));
//! let mut machine = UpdateMachine::new(checker, DownloadEngine::new("app-updater")?, options);
//! machine.add_observer(Arc::new(|event: &StateEvent| {
//!     println!("{} -> {}", event.previous, event.current);
//! }));
//! let session = machine.run().await?;
//! println!("now at {}", session.effective_version());
//! # Ok(())
//! # }
//! ```

pub mod checker;
pub mod instance_lock;
pub mod machine;
pub mod mirror;
pub mod session;
pub mod state;

pub use checker::{CheckRequest, UpdateChecker, UpdateInfo};
pub use instance_lock::InstanceLock;
pub use machine::{ProbeSettings, UpdateMachine, UpdateOptions};
pub use mirror::MirrorClient;
pub use session::UpdateSession;
pub use state::{StateEvent, StateObserver, StateTracker, UpdateState};
