//! Periodic capture and compression of camera or screen frames.
//!
//! Frames are sampled on a fixed timer, downscaled and JPEG-compressed with a
//! per-mode profile, then handed to a callback. Switching between camera and
//! screen share changes the profile on the next tick without restarting the
//! timer.

pub mod encoder;
pub mod mode;
pub mod pipeline;
pub mod source;

pub use encoder::{JPEG_MIME_TYPE, VideoFrame, compress_frame, downscale, encode_jpeg};
pub use mode::{
    DEFAULT_CAMERA_PROFILE, DEFAULT_SCREEN_SHARE_PROFILE, ModeProfile, VideoProfiles, VisualMode,
};
pub use pipeline::{
    DEFAULT_VIDEO_FPS, VideoFrameCallback, VideoFramePipeline, VideoHandle, VideoPipelineConfig,
    VideoStats,
};
pub use source::{
    ImageFileSource, ImageFileSourceProvider, StaticFrameSource, StaticSourceProvider,
    VideoSource, VideoSourceProvider,
};
