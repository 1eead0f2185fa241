//! Video sources: anything that can hand over the current frame on demand.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use image::RgbImage;

use super::mode::VisualMode;
use crate::core::error::{LiveError, LiveResult};

/// A camera, a screen, or anything else producing frames.
///
/// Sources are polled from the blocking pool, so `render` may do file or
/// device I/O.
pub trait VideoSource: Send {
    /// Human readable source name for logs.
    fn name(&self) -> String;

    /// Whether a frame is available right now.
    fn has_frame(&mut self) -> bool;

    /// Current frame at native resolution.
    fn render(&mut self) -> LiveResult<RgbImage>;
}

/// Opens the source backing a visual mode.
///
/// Returns [`LiveError::DeviceUnavailable`] when the mode's source is absent
/// or access is denied.
pub trait VideoSourceProvider: Send + Sync {
    fn open(&self, mode: VisualMode) -> LiveResult<Box<dyn VideoSource>>;
}

// =============================================================================
// Image file source
// =============================================================================

/// Source that re-reads an image file, decoding again only when it changes.
///
/// Pointing a screenshot tool or a webcam snapshot utility at the path
/// turns it into a live feed. A file that has not been rewritten since the
/// last render has no new frame, so a stalled writer behaves like a paused
/// camera.
pub struct ImageFileSource {
    path: PathBuf,
    cached: Option<(SystemTime, RgbImage)>,
}

impl ImageFileSource {
    /// Open `path`, failing if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> LiveResult<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(LiveError::DeviceUnavailable(format!(
                "video source {} not found",
                path.display()
            )));
        }
        Ok(Self { path, cached: None })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
    }
}

impl VideoSource for ImageFileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn has_frame(&mut self) -> bool {
        if !self.path.is_file() {
            return false;
        }
        match (&self.cached, self.modified()) {
            (Some((stamp, _)), Some(modified)) => *stamp != modified,
            _ => true,
        }
    }

    fn render(&mut self) -> LiveResult<RgbImage> {
        let modified = self.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if let Some((stamp, image)) = &self.cached {
            if *stamp == modified {
                return Ok(image.clone());
            }
        }

        let image = image::open(&self.path)
            .map_err(|e| {
                LiveError::DeviceUnavailable(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                ))
            })?
            .to_rgb8();
        self.cached = Some((modified, image.clone()));
        Ok(image)
    }
}

/// Provider mapping each mode to an image file.
#[derive(Debug, Clone, Default)]
pub struct ImageFileSourceProvider {
    pub camera: Option<PathBuf>,
    pub screen: Option<PathBuf>,
}

impl ImageFileSourceProvider {
    pub fn new(camera: Option<PathBuf>, screen: Option<PathBuf>) -> Self {
        Self { camera, screen }
    }
}

impl VideoSourceProvider for ImageFileSourceProvider {
    fn open(&self, mode: VisualMode) -> LiveResult<Box<dyn VideoSource>> {
        let path = match mode {
            VisualMode::Camera => self.camera.as_ref(),
            VisualMode::ScreenShare => self.screen.as_ref(),
            VisualMode::None => {
                return Err(LiveError::InvalidState(
                    "visual mode none has no source".to_string(),
                ));
            }
        };
        let path = path.ok_or_else(|| {
            LiveError::DeviceUnavailable(format!("no {} source configured", mode))
        })?;
        Ok(Box::new(ImageFileSource::open(path)?))
    }
}

// =============================================================================
// In-memory source
// =============================================================================

/// Source serving a fixed image, with a switch to simulate a paused feed.
#[derive(Clone)]
pub struct StaticFrameSource {
    name: String,
    image: RgbImage,
    paused: Arc<AtomicBool>,
}

impl StaticFrameSource {
    pub fn new(name: impl Into<String>, image: RgbImage) -> Self {
        Self {
            name: name.into(),
            image,
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Solid image of the given size.
    pub fn solid(name: impl Into<String>, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::new(name, RgbImage::from_pixel(width, height, image::Rgb(rgb)))
    }

    /// Pause or resume frame availability. Shared by all clones.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

impl VideoSource for StaticFrameSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn has_frame(&mut self) -> bool {
        !self.paused.load(Ordering::SeqCst)
    }

    fn render(&mut self) -> LiveResult<RgbImage> {
        Ok(self.image.clone())
    }
}

/// Provider handing out a [`StaticFrameSource`] per mode.
#[derive(Clone)]
pub struct StaticSourceProvider {
    pub camera: Option<StaticFrameSource>,
    pub screen: Option<StaticFrameSource>,
}

impl StaticSourceProvider {
    /// Camera at 1280x720 and screen at 1920x1080.
    pub fn hd() -> Self {
        Self {
            camera: Some(StaticFrameSource::solid("camera", 1280, 720, [40, 90, 160])),
            screen: Some(StaticFrameSource::solid("screen", 1920, 1080, [240, 240, 240])),
        }
    }
}

impl VideoSourceProvider for StaticSourceProvider {
    fn open(&self, mode: VisualMode) -> LiveResult<Box<dyn VideoSource>> {
        let source = match mode {
            VisualMode::Camera => self.camera.clone(),
            VisualMode::ScreenShare => self.screen.clone(),
            VisualMode::None => None,
        };
        source
            .map(|s| Box::new(s) as Box<dyn VideoSource>)
            .ok_or_else(|| LiveError::DeviceUnavailable(format!("no {} source", mode)))
    }
}
