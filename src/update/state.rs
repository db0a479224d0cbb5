//! Update states and their observation.
//!
//! [`StateTracker`] owns the current [`UpdateState`] behind one mutex. Every
//! accepted transition is published three ways: the polled getter
//! [`StateTracker::current`], a `tokio::sync::watch` channel, and any number of
//! registered [`StateObserver`]s. Observers run after the lock is released,
//! so they may call back into the tracker.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Stage of an update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    Checking,
    UpdateAvailable,
    Downloading,
    Installing,
    Completed,
    Error,
}

impl UpdateState {
    /// `Completed` and `Error` end the session.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether the session may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Completed | Self::Error, _) => false,
            (_, Self::Error) => true,
            (Self::Idle, Self::Checking)
            | (Self::Checking, Self::UpdateAvailable | Self::Completed)
            | (Self::UpdateAvailable, Self::Downloading)
            | (Self::Downloading, Self::Installing)
            | (Self::Installing, Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::UpdateAvailable => "update available",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// One accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    pub previous: UpdateState,
    pub current: UpdateState,
    pub at: DateTime<Utc>,
}

/// Receives every state transition.
pub trait StateObserver: Send + Sync {
    fn on_state_change(&self, event: &StateEvent);
}

impl<F> StateObserver for F
where
    F: Fn(&StateEvent) + Send + Sync,
{
    fn on_state_change(&self, event: &StateEvent) {
        self(event);
    }
}

/// Mutex-guarded current state plus its observers.
pub struct StateTracker {
    state: Mutex<UpdateState>,
    observers: Mutex<Vec<Arc<dyn StateObserver>>>,
    sender: watch::Sender<UpdateState>,
}

impl fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTracker")
            .field("state", &self.current())
            .finish_non_exhaustive()
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(UpdateState::Idle);
        Self {
            state: Mutex::new(UpdateState::Idle),
            observers: Mutex::new(Vec::new()),
            sender,
        }
    }

    #[must_use]
    pub fn current(&self) -> UpdateState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A receiver that always sees the latest state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.sender.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn StateObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Move to `next` and notify observers.
    ///
    /// Returns `None`, leaving the state unchanged, when the move is not
    /// allowed from the current state.
    pub fn transition(&self, next: UpdateState) -> Option<StateEvent> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.can_transition_to(next) {
                warn!("Ignoring state change {} -> {}", *state, next);
                return None;
            }
            std::mem::replace(&mut *state, next)
        };

        let event = StateEvent {
            previous,
            current: next,
            at: Utc::now(),
        };
        debug!("State: {} -> {}", previous, next);
        self.sender.send_replace(next);

        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_state_change(&event);
        }
        Some(event)
    }
}
