//! Session lifecycle state machine.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──opened──▶ Active ──disconnect──▶ Closing ──▶ Closed
//!                      │                     │
//!                      └──── failure ────────┴──────▶ Error
//! ```
//!
//! `Closed` and `Error` accept a new `connect`. There is no automatic
//! reconnect.

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::error::{LiveError, LiveResult};

/// Lifecycle state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Error,
}

impl SessionState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }

    /// Whether `connect` may be called from this state.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Idle | Self::Closed | Self::Error)
    }

    /// Whether the machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle | Closed | Error, Connecting)
                | (Connecting, Active)
                | (Connecting | Active, Error)
                | (Connecting | Active, Closing)
                | (Closing, Closed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared state with validated transitions.
#[derive(Debug, Default)]
pub struct StateCell(Mutex<SessionState>);

impl StateCell {
    pub fn get(&self) -> SessionState {
        *self.0.lock()
    }

    /// Move to `next`, returning the previous state.
    ///
    /// # Errors
    ///
    /// [`LiveError::InvalidState`] if the transition is not allowed.
    pub fn transition(&self, next: SessionState) -> LiveResult<SessionState> {
        let mut state = self.0.lock();
        let previous = *state;
        if !previous.can_transition_to(next) {
            return Err(LiveError::InvalidState(format!(
                "cannot move from {} to {}",
                previous, next
            )));
        }
        *state = next;
        tracing::info!(from = %previous, to = %next, "Session state changed");
        Ok(previous)
    }

    /// Move from `expected` to `next` only if the current state is `expected`.
    pub fn compare_and_transition(&self, expected: SessionState, next: SessionState) -> bool {
        let mut state = self.0.lock();
        if *state != expected || !expected.can_transition_to(next) {
            return false;
        }
        *state = next;
        tracing::info!(from = %expected, to = %next, "Session state changed");
        true
    }
}
