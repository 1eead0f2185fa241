//! Configuration module for WaaV Live
//!
//! This module handles session configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Environment Variables
//! - `WAAV_LIVE_PROVIDER` (default `gemini`)
//! - `WAAV_LIVE_API_KEY`, falling back to `GEMINI_API_KEY`
//! - `WAAV_LIVE_ENDPOINT`, `WAAV_LIVE_MODEL`, `WAAV_LIVE_VOICE`, `WAAV_LIVE_INSTRUCTIONS`
//! - `WAAV_LIVE_CAPTURE_SAMPLE_RATE`, `WAAV_LIVE_FRAME_SIZE`, `WAAV_LIVE_PLAYBACK_SAMPLE_RATE`
//! - `WAAV_LIVE_HANDSHAKE_TIMEOUT_MS`, `WAAV_LIVE_OUTBOUND_CAPACITY`
//! - `WAAV_LIVE_VIDEO_FPS`, `WAAV_LIVE_VISUAL_MODE`
//! - `WAAV_LIVE_CAMERA_SCALE`, `WAAV_LIVE_CAMERA_QUALITY`
//! - `WAAV_LIVE_SCREEN_SCALE`, `WAAV_LIVE_SCREEN_QUALITY`
//! - `WAAV_LIVE_CAMERA_IMAGE`, `WAAV_LIVE_SCREEN_IMAGE`
//!
//! # Example
//! ```rust,no_run
//! use waav_live::config::LiveConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = LiveConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("live.yaml");
//! let config = LiveConfig::from_file(&config_path)?;
//!
//! println!("Streaming at {} fps", config.video_fps);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod yaml;

pub use yaml::{AudioYaml, ProfileYaml, TransportYaml, VideoYaml, YamlConfig};

use crate::core::audio::{
    CaptureConfig, DEFAULT_CAPTURE_SAMPLE_RATE, DEFAULT_FRAME_SIZE, DEFAULT_PLAYBACK_SAMPLE_RATE,
};
use crate::core::error::{LiveError, LiveResult};
use crate::core::session::{DEFAULT_HANDSHAKE_TIMEOUT, SessionOptions};
use crate::core::transport::{DEFAULT_OUTBOUND_CAPACITY, TransportConfig, TransportProvider};
use crate::core::video::{
    DEFAULT_CAMERA_PROFILE, DEFAULT_SCREEN_SHARE_PROFILE, DEFAULT_VIDEO_FPS, ImageFileSourceProvider,
    ModeProfile, VideoPipelineConfig, VideoProfiles, VisualMode,
};

/// Highest accepted video capture rate.
pub const MAX_VIDEO_FPS: f32 = 30.0;

/// Live session configuration
#[derive(Clone)]
pub struct LiveConfig {
    /// Transport provider name, see [`TransportProvider::parse`]
    pub provider: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,

    pub capture_sample_rate: u32,
    pub frame_size: usize,
    pub playback_sample_rate: u32,
    pub handshake_timeout: Duration,
    pub outbound_capacity: usize,

    pub video_fps: f32,
    pub initial_mode: VisualMode,
    pub camera_profile: ModeProfile,
    pub screen_share_profile: ModeProfile,
    /// Image file rendered as the camera feed
    pub camera_image: Option<PathBuf>,
    /// Image file rendered as the shared screen
    pub screen_image: Option<PathBuf>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            provider: TransportProvider::Gemini.to_string(),
            api_key: None,
            endpoint: None,
            model: None,
            voice: None,
            instructions: None,
            capture_sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            playback_sample_rate: DEFAULT_PLAYBACK_SAMPLE_RATE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            video_fps: DEFAULT_VIDEO_FPS,
            initial_mode: VisualMode::None,
            camera_profile: DEFAULT_CAMERA_PROFILE,
            screen_share_profile: DEFAULT_SCREEN_SHARE_PROFILE,
            camera_image: None,
            screen_image: None,
        }
    }
}

impl std::fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("capture_sample_rate", &self.capture_sample_rate)
            .field("frame_size", &self.frame_size)
            .field("playback_sample_rate", &self.playback_sample_rate)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("video_fps", &self.video_fps)
            .field("initial_mode", &self.initial_mode)
            .field("camera_profile", &self.camera_profile)
            .field("screen_share_profile", &self.screen_share_profile)
            .finish()
    }
}

/// Implement Drop to zeroize the API key when LiveConfig is dropped.
impl Drop for LiveConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

/// Read a non-empty environment variable.
fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an environment variable, failing on malformed values.
fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>, String> {
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("Invalid value for {name}: {raw}")),
        None => Ok(None),
    }
}

fn parse_mode(raw: &str) -> Result<VisualMode, String> {
    VisualMode::parse(raw).ok_or_else(|| format!("Invalid visual mode: {raw}"))
}

impl LiveConfig {
    /// Load configuration from environment variables
    ///
    /// The .env file is loaded by the binary before this is called.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::env_base()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::env_base()?;
        config.apply_yaml(yaml_config)?;
        config.validate()?;

        Ok(config)
    }

    fn env_base() -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(provider) = env_var("WAAV_LIVE_PROVIDER") {
            config.provider = provider;
        }
        config.api_key = env_var("WAAV_LIVE_API_KEY").or_else(|| env_var("GEMINI_API_KEY"));
        config.endpoint = env_var("WAAV_LIVE_ENDPOINT");
        config.model = env_var("WAAV_LIVE_MODEL");
        config.voice = env_var("WAAV_LIVE_VOICE");
        config.instructions = env_var("WAAV_LIVE_INSTRUCTIONS");

        if let Some(rate) = parse_env("WAAV_LIVE_CAPTURE_SAMPLE_RATE")? {
            config.capture_sample_rate = rate;
        }
        if let Some(size) = parse_env("WAAV_LIVE_FRAME_SIZE")? {
            config.frame_size = size;
        }
        if let Some(rate) = parse_env("WAAV_LIVE_PLAYBACK_SAMPLE_RATE")? {
            config.playback_sample_rate = rate;
        }
        if let Some(ms) = parse_env::<u64>("WAAV_LIVE_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_env("WAAV_LIVE_OUTBOUND_CAPACITY")? {
            config.outbound_capacity = capacity;
        }

        if let Some(fps) = parse_env("WAAV_LIVE_VIDEO_FPS")? {
            config.video_fps = fps;
        }
        if let Some(mode) = env_var("WAAV_LIVE_VISUAL_MODE") {
            config.initial_mode = parse_mode(&mode)?;
        }
        if let Some(scale) = parse_env("WAAV_LIVE_CAMERA_SCALE")? {
            config.camera_profile.scale = scale;
        }
        if let Some(quality) = parse_env("WAAV_LIVE_CAMERA_QUALITY")? {
            config.camera_profile.quality = quality;
        }
        if let Some(scale) = parse_env("WAAV_LIVE_SCREEN_SCALE")? {
            config.screen_share_profile.scale = scale;
        }
        if let Some(quality) = parse_env("WAAV_LIVE_SCREEN_QUALITY")? {
            config.screen_share_profile.quality = quality;
        }
        config.camera_image = env_var("WAAV_LIVE_CAMERA_IMAGE").map(PathBuf::from);
        config.screen_image = env_var("WAAV_LIVE_SCREEN_IMAGE").map(PathBuf::from);

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> Result<(), String> {
        if let Some(transport) = yaml.transport {
            if let Some(provider) = transport.provider {
                self.provider = provider;
            }
            if let Some(key) = transport.api_key {
                if let Some(ref mut old) = self.api_key {
                    zeroize::Zeroize::zeroize(old);
                }
                self.api_key = Some(key);
            }
            if transport.endpoint.is_some() {
                self.endpoint = transport.endpoint;
            }
            if transport.model.is_some() {
                self.model = transport.model;
            }
            if transport.voice.is_some() {
                self.voice = transport.voice;
            }
            if transport.instructions.is_some() {
                self.instructions = transport.instructions;
            }
            if let Some(ms) = transport.handshake_timeout_ms {
                self.handshake_timeout = Duration::from_millis(ms);
            }
            if let Some(capacity) = transport.outbound_capacity {
                self.outbound_capacity = capacity;
            }
        }

        if let Some(audio) = yaml.audio {
            if let Some(rate) = audio.capture_sample_rate {
                self.capture_sample_rate = rate;
            }
            if let Some(size) = audio.frame_size {
                self.frame_size = size;
            }
            if let Some(rate) = audio.playback_sample_rate {
                self.playback_sample_rate = rate;
            }
        }

        if let Some(video) = yaml.video {
            if let Some(fps) = video.fps {
                self.video_fps = fps;
            }
            if let Some(mode) = video.initial_mode {
                self.initial_mode = parse_mode(&mode)?;
            }
            if let Some(path) = video.camera_image {
                self.camera_image = Some(PathBuf::from(path));
            }
            if let Some(path) = video.screen_image {
                self.screen_image = Some(PathBuf::from(path));
            }
            if let Some(profile) = video.camera {
                apply_profile(&mut self.camera_profile, profile);
            }
            if let Some(profile) = video.screen_share {
                apply_profile(&mut self.screen_share_profile, profile);
            }
        }

        Ok(())
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> LiveResult<()> {
        if TransportProvider::parse(&self.provider).is_none() {
            return Err(LiveError::InvalidConfiguration(format!(
                "Unsupported transport provider: {}",
                self.provider
            )));
        }
        if self.capture_sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(LiveError::InvalidConfiguration(
                "sample rates must be positive".to_string(),
            ));
        }
        if self.frame_size == 0 {
            return Err(LiveError::InvalidConfiguration(
                "frame size must be positive".to_string(),
            ));
        }
        if self.outbound_capacity == 0 {
            return Err(LiveError::InvalidConfiguration(
                "outbound capacity must be positive".to_string(),
            ));
        }
        if !(self.video_fps > 0.0 && self.video_fps <= MAX_VIDEO_FPS) {
            return Err(LiveError::InvalidConfiguration(format!(
                "video fps must be in (0, {}], got {}",
                MAX_VIDEO_FPS, self.video_fps
            )));
        }
        self.session_options().validate()
    }

    /// Whether an API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn video_profiles(&self) -> VideoProfiles {
        VideoProfiles {
            camera: self.camera_profile,
            screen_share: self.screen_share_profile,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            capture: CaptureConfig {
                sample_rate: self.capture_sample_rate,
                frame_size: self.frame_size,
            },
            playback_sample_rate: self.playback_sample_rate,
            handshake_timeout: self.handshake_timeout,
            video: VideoPipelineConfig {
                fps: self.video_fps,
                profiles: self.video_profiles(),
            },
            initial_mode: self.initial_mode,
        }
    }

    /// Build the transport configuration.
    ///
    /// # Errors
    /// [`LiveError::InvalidConfiguration`] when no API key is configured.
    pub fn transport_config(&self) -> LiveResult<TransportConfig> {
        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                LiveError::InvalidConfiguration(
                    "API key not configured (set WAAV_LIVE_API_KEY or GEMINI_API_KEY)".to_string(),
                )
            })?;

        Ok(TransportConfig {
            api_key,
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            voice: self.voice.clone(),
            instructions: self.instructions.clone(),
            input_sample_rate: self.capture_sample_rate,
            outbound_capacity: self.outbound_capacity,
        })
    }

    /// Video sources backed by the configured image files.
    pub fn image_source_provider(&self) -> ImageFileSourceProvider {
        ImageFileSourceProvider::new(self.camera_image.clone(), self.screen_image.clone())
    }
}

fn apply_profile(profile: &mut ModeProfile, yaml: ProfileYaml) {
    if let Some(scale) = yaml.scale {
        profile.scale = scale;
    }
    if let Some(quality) = yaml.quality {
        profile.quality = quality;
    }
}
