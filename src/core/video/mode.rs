//! Visual modes and the resolution/quality trade-off each one selects.
//!
//! Screen sharing keeps more pixels and a higher JPEG quality so on-screen
//! text stays legible. Camera frames only need faces and gestures to be
//! recognizable, so they are smaller and more compressed.

use serde::{Deserialize, Serialize};

use crate::core::error::{LiveError, LiveResult};

/// Active video source and purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualMode {
    /// No video is sent
    #[default]
    None,
    /// Live camera feed
    Camera,
    /// Shared screen
    ScreenShare,
}

impl VisualMode {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Camera => "camera",
            Self::ScreenShare => "screen_share",
        }
    }

    /// Parse a mode name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "camera" | "cam" | "webcam" => Some(Self::Camera),
            "screen" | "screen_share" | "screen-share" | "screenshare" => Some(Self::ScreenShare),
            _ => None,
        }
    }

    /// Whether this mode sends video at all.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for VisualMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Downscale factor and compression quality for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeProfile {
    /// Fraction of the source resolution kept on each axis, in (0, 1]
    pub scale: f32,
    /// JPEG quality factor, in (0, 1]
    pub quality: f32,
}

impl ModeProfile {
    pub const fn new(scale: f32, quality: f32) -> Self {
        Self { scale, quality }
    }

    /// Quality mapped onto the JPEG encoder's 1..=100 range.
    pub fn jpeg_quality(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }

    /// Target dimensions for a source of `width` x `height`.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        let w = ((width as f32) * self.scale).round().max(1.0) as u32;
        let h = ((height as f32) * self.scale).round().max(1.0) as u32;
        (w, h)
    }

    pub fn validate(&self, name: &str) -> LiveResult<()> {
        let in_range = |v: f32| v > 0.0 && v <= 1.0;
        if !in_range(self.scale) {
            return Err(LiveError::InvalidConfiguration(format!(
                "{} scale must be in (0, 1], got {}",
                name, self.scale
            )));
        }
        if !in_range(self.quality) {
            return Err(LiveError::InvalidConfiguration(format!(
                "{} quality must be in (0, 1], got {}",
                name, self.quality
            )));
        }
        Ok(())
    }
}

/// Camera profile used when none is configured.
pub const DEFAULT_CAMERA_PROFILE: ModeProfile = ModeProfile::new(0.25, 0.5);

/// Screen-share profile used when none is configured.
pub const DEFAULT_SCREEN_SHARE_PROFILE: ModeProfile = ModeProfile::new(0.5, 0.7);

/// Profiles for every mode that sends video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoProfiles {
    pub camera: ModeProfile,
    pub screen_share: ModeProfile,
}

impl Default for VideoProfiles {
    fn default() -> Self {
        Self {
            camera: DEFAULT_CAMERA_PROFILE,
            screen_share: DEFAULT_SCREEN_SHARE_PROFILE,
        }
    }
}

impl VideoProfiles {
    /// Profile for `mode`, or `None` when the mode sends no video.
    pub fn for_mode(&self, mode: VisualMode) -> Option<ModeProfile> {
        match mode {
            VisualMode::None => None,
            VisualMode::Camera => Some(self.camera),
            VisualMode::ScreenShare => Some(self.screen_share),
        }
    }

    /// Both profiles in range, and screen share never below camera.
    pub fn validate(&self) -> LiveResult<()> {
        self.camera.validate("camera")?;
        self.screen_share.validate("screen_share")?;
        if self.screen_share.scale < self.camera.scale
            || self.screen_share.quality < self.camera.quality
        {
            return Err(LiveError::InvalidConfiguration(
                "screen_share profile must not be smaller or lower quality than camera"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
