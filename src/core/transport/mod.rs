//! Duplex media transport module.
//!
//! Abstractions and implementations for the bidirectional channel between a
//! live session and the remote conversational service.
//!
//! # Supported Providers
//!
//! - **Gemini Live** - native audio responses, PCM and JPEG media input
//!
//! # Architecture
//!
//! - [`Transport`] trait for provider abstraction
//! - Factory functions for dynamic provider creation
//! - Event stream instead of callbacks, consumed by the session controller

mod base;
pub mod gemini;

pub use base::{
    BoxedTransport, DEFAULT_OUTBOUND_CAPACITY, EVENT_CHANNEL_CAPACITY, MediaReceiver,
    MediaSender, OutboundMedia, Transport, TransportChannel, TransportConfig, TransportEvent,
    media_channel,
};
pub use gemini::{GEMINI_LIVE_URL, GeminiLiveTransport, GeminiVoice};

use crate::core::error::{LiveError, LiveResult};

/// Supported transport providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProvider {
    /// Google Gemini Live API
    Gemini,
}

impl TransportProvider {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" | "gemini_live" | "gemini-live" | "google" => Some(TransportProvider::Gemini),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportProvider::Gemini => write!(f, "gemini"),
        }
    }
}

/// Factory function to create a transport.
///
/// # Supported Providers
///
/// - `"gemini"` / `"gemini-live"` - Gemini Live API
pub fn create_transport(provider_type: &str, config: TransportConfig) -> LiveResult<BoxedTransport> {
    let provider = TransportProvider::parse(provider_type).ok_or_else(|| {
        LiveError::InvalidConfiguration(format!(
            "Unsupported transport provider: {}. Supported providers: {}",
            provider_type,
            get_supported_transport_providers().join(", ")
        ))
    })?;
    create_transport_from_enum(provider, config)
}

/// Create a transport from enum.
pub fn create_transport_from_enum(
    provider: TransportProvider,
    config: TransportConfig,
) -> LiveResult<BoxedTransport> {
    match provider {
        TransportProvider::Gemini => Ok(Box::new(GeminiLiveTransport::new(config)?)),
    }
}

/// Get list of supported transport providers.
pub fn get_supported_transport_providers() -> Vec<&'static str> {
    vec!["gemini"]
}
