//! Gemini Live WebSocket message types.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - Model, voice and system instructions; must be the first message
//! - realtimeInput - Media chunks (PCM audio or JPEG frames), base64 encoded
//!
//! Server messages (received from server):
//! - setupComplete - Setup accepted, media may flow
//! - serverContent - Model turn parts, turn completion and interruption flags
//! - goAway - Server will close the connection soon
//! - error - Request rejected
//!
//! The server may send JSON in either text or binary frames.

use serde::{Deserialize, Serialize};

use super::config::{GeminiVoice, normalize_model};
use crate::core::audio::{AudioChunk, bytes_to_transport_text};
use crate::core::transport::base::TransportEvent;

// =============================================================================
// Shared content types
// =============================================================================

/// Inline binary payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: bytes_to_transport_text(bytes),
        }
    }
}

/// One part of a content turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// A sequence of parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

// =============================================================================
// Client messages
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Session setup, the first message on every connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

impl Setup {
    /// Audio-response setup for `model`, `voice` and optional instructions.
    pub fn audio(model: &str, voice: GeminiVoice, instructions: Option<&str>) -> Self {
        Self {
            model: normalize_model(model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.as_str().to_string(),
                        },
                    },
                }),
            },
            system_instruction: instructions
                .filter(|s| !s.trim().is_empty())
                .map(Content::text),
        }
    }
}

/// Streamed media input.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Messages sent to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// A single media chunk.
    pub fn media(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob::new(mime_type, bytes)],
        })
    }
}

// =============================================================================
// Server messages
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.message.as_deref().unwrap_or("unknown error");
        match (&self.status, self.code) {
            (Some(status), _) => write!(f, "{}: {}", status, message),
            (None, Some(code)) => write!(f, "{}: {}", code, message),
            (None, None) => write!(f, "{}", message),
        }
    }
}

/// A message from the server. Fields not listed are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
    #[serde(default)]
    pub error: Option<ServerError>,
}

impl ServerMessage {
    /// Translate into transport events, numbering audio chunks from `next_seq`.
    pub fn into_events(self, next_seq: &mut u64) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(TransportEvent::Opened);
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(TransportEvent::Interrupted);
            }
            let parts = content.model_turn.map(|t| t.parts).unwrap_or_default();
            for blob in parts.into_iter().filter_map(|p| p.inline_data) {
                if !blob.mime_type.starts_with("audio/") {
                    tracing::debug!(mime_type = %blob.mime_type, "Ignoring non-audio part");
                    continue;
                }
                events.push(TransportEvent::AudioChunk(AudioChunk {
                    seq: *next_seq,
                    mime_type: Some(blob.mime_type),
                    data: blob.data,
                }));
                *next_seq += 1;
            }
            if content.turn_complete {
                events.push(TransportEvent::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            tracing::warn!(
                time_left = go_away.time_left.as_deref().unwrap_or("unknown"),
                "Server announced disconnect"
            );
        }

        if let Some(error) = self.error {
            events.push(TransportEvent::Error(error.to_string()));
        }

        events
    }
}
