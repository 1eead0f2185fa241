//! Live session lifecycle.
//!
//! [`LiveSession`] ties the audio, video and transport modules together and
//! enforces the state machine in [`state`].

pub mod controller;
pub mod state;

pub use controller::{
    AgentAudioActivityCallback, DEFAULT_HANDSHAKE_TIMEOUT, LiveSession, SessionDevices,
    SessionErrorCallback, SessionOptions, SessionStats,
};
pub use state::{SessionState, StateCell};
