//! Gemini Live API module.
//!
//! Streams microphone PCM and JPEG frames to Gemini Live and receives
//! synthesized speech back.
//!
//! # Supported Voices
//!
//! Puck, Charon, Kore, Fenrir, Aoede, Leda, Orus, Zephyr
//!
//! # Audio Format
//!
//! Input is PCM 16-bit signed little-endian, rate advertised per chunk
//! (`audio/pcm;rate=16000` by default). Output is PCM 16-bit at 24kHz.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_live::core::transport::{GeminiLiveTransport, Transport, TransportConfig};
//!
//! let mut transport = GeminiLiveTransport::new(TransportConfig {
//!     api_key: "AIza...".to_string(),
//!     voice: Some("Kore".to_string()),
//!     ..Default::default()
//! })?;
//! let channel = transport.open().await?;
//! ```

mod client;
mod config;
mod messages;

pub use client::GeminiLiveTransport;
pub use config::{
    GEMINI_DEFAULT_MODEL, GEMINI_LIVE_URL, GeminiVoice,
    normalize_model, pcm_mime_type,
};
pub use messages::{ClientMessage, ServerMessage, Setup};
