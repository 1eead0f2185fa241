//! Gemini Live API configuration types.

use serde::{Deserialize, Serialize};

/// Gemini Live bidirectional streaming endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Model used when none is configured.
pub const GEMINI_DEFAULT_MODEL: &str = "models/gemini-live-2.5-flash-native-audio";

// =============================================================================
// Voices
// =============================================================================

/// Prebuilt voices for spoken responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeminiVoice {
    #[default]
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
}

impl GeminiVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
            Self::Leda => "Leda",
            Self::Orus => "Orus",
            Self::Zephyr => "Zephyr",
        }
    }

    /// Parse a voice name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "puck" => Some(Self::Puck),
            "charon" => Some(Self::Charon),
            "kore" => Some(Self::Kore),
            "fenrir" => Some(Self::Fenrir),
            "aoede" => Some(Self::Aoede),
            "leda" => Some(Self::Leda),
            "orus" => Some(Self::Orus),
            "zephyr" => Some(Self::Zephyr),
            _ => None,
        }
    }

    pub fn all() -> &'static [GeminiVoice] {
        &[
            Self::Puck,
            Self::Charon,
            Self::Kore,
            Self::Fenrir,
            Self::Aoede,
            Self::Leda,
            Self::Orus,
            Self::Zephyr,
        ]
    }
}

impl std::fmt::Display for GeminiVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalize a model name to the `models/` form the setup message expects.
pub fn normalize_model(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// PCM MIME type advertising `rate`.
pub fn pcm_mime_type(rate: u32) -> String {
    format!("audio/pcm;rate={}", rate)
}
