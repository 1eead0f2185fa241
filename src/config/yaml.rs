use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// transport:
///   provider: "gemini"
///   api_key: "your-api-key"
///   model: "models/gemini-live-2.5-flash-native-audio"
///   voice: "Kore"
///   instructions: "You are a concise assistant."
///   handshake_timeout_ms: 10000
///   outbound_capacity: 64
///
/// audio:
///   capture_sample_rate: 16000
///   frame_size: 4096
///   playback_sample_rate: 24000
///
/// video:
///   fps: 1.0
///   initial_mode: "none"
///   camera_image: "/tmp/camera.jpg"
///   screen_image: "/tmp/screen.png"
///   camera:
///     scale: 0.25
///     quality: 0.5
///   screen_share:
///     scale: 0.5
///     quality: 0.7
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub transport: Option<TransportYaml>,
    pub audio: Option<AudioYaml>,
    pub video: Option<VideoYaml>,
}

/// Transport configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TransportYaml {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub handshake_timeout_ms: Option<u64>,
    pub outbound_capacity: Option<usize>,
}

/// Audio configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub capture_sample_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub playback_sample_rate: Option<u32>,
}

/// Video configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VideoYaml {
    pub fps: Option<f32>,
    /// "none", "camera" or "screen_share"
    pub initial_mode: Option<String>,
    pub camera_image: Option<String>,
    pub screen_image: Option<String>,
    pub camera: Option<ProfileYaml>,
    pub screen_share: Option<ProfileYaml>,
}

/// Per-mode profile from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProfileYaml {
    pub scale: Option<f32>,
    pub quality: Option<f32>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
