//! Downscaling and JPEG compression of rendered frames.

use bytes::Bytes;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};

use super::mode::{ModeProfile, VisualMode};
use crate::core::error::{LiveError, LiveResult};

/// MIME type of every encoded frame.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// One compressed still image ready for transmission.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame counter within the pipeline, starting at 0
    pub seq: u64,
    /// Mode in effect on the tick that produced this frame
    pub mode: VisualMode,
    pub width: u32,
    pub height: u32,
    /// JPEG bytes
    pub data: Bytes,
}

/// Downscale `image` to the profile's target resolution.
pub fn downscale(image: &RgbImage, profile: ModeProfile) -> RgbImage {
    let (width, height) = profile.target_size(image.width(), image.height());
    if (width, height) == image.dimensions() {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// JPEG-encode `image` at `quality` in 1..=100.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> LiveResult<Vec<u8>> {
    let mut out = Vec::with_capacity((image.width() * image.height()) as usize / 4);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| LiveError::Encode(e.to_string()))?;
    Ok(out)
}

/// Downscale and compress a rendered frame with the mode's profile.
pub fn compress_frame(
    image: &RgbImage,
    mode: VisualMode,
    profile: ModeProfile,
    seq: u64,
) -> LiveResult<VideoFrame> {
    if image.width() == 0 || image.height() == 0 {
        return Err(LiveError::Encode("empty frame".to_string()));
    }
    let scaled = downscale(image, profile);
    let data = encode_jpeg(&scaled, profile.jpeg_quality())?;
    Ok(VideoFrame {
        seq,
        mode,
        width: scaled.width(),
        height: scaled.height(),
        data: Bytes::from(data),
    })
}
