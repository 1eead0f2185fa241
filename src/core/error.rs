//! Error taxonomy for the streaming session manager.
//!
//! Three error kinds carry session semantics:
//!
//! - [`LiveError::DeviceUnavailable`] - microphone, camera or screen source could not be
//!   opened. Surfaced to the caller at start or mode-toggle time, never retried.
//! - [`LiveError::MalformedAudio`] - an inbound chunk could not be decoded. Local to the
//!   playback path: the chunk is dropped and the session continues.
//! - [`LiveError::Transport`] - the duplex channel failed. Fatal to the session.
//!
//! The remaining variants cover configuration and API misuse.

use thiserror::Error;

/// Errors that can occur while running a live session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LiveError {
    /// Audio or video device absent, busy, or permission denied
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Received audio payload could not be decoded
    #[error("Malformed audio: {0}")]
    MalformedAudio(String),

    /// Connection drop, handshake failure, or remote-side error event
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Video frame could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LiveError {
    /// Whether this error terminates the owning session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LiveError::Transport(_))
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        LiveError::Serialization(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LiveError::Transport(e.to_string())
    }
}

/// Result type for live session operations.
pub type LiveResult<T> = Result<T, LiveError>;
