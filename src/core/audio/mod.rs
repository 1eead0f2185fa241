//! Audio capture, conversion and jitter-buffered playback.
//!
//! # Feature Flag
//!
//! Hardware devices require the `backend-cpal` feature. Without it only the
//! [`null`] backend is available, which keeps time but touches no hardware.
//!
//! # Audio Format
//!
//! - Outbound: PCM 16-bit signed little-endian mono, 16 kHz by default
//! - Inbound: PCM 16-bit signed little-endian mono, 24 kHz by default
//!
//! The two rates are configured independently and never assumed equal.

pub mod capture;
pub mod clock;
pub mod convert;
#[cfg(feature = "backend-cpal")]
pub mod cpal_backend;
pub mod device;
pub mod null;
pub mod resample;
pub mod scheduler;

pub use capture::{
    AudioFrame, CaptureConfig, CaptureHandle, CapturePipeline, DEFAULT_CAPTURE_SAMPLE_RATE,
    DEFAULT_FRAME_SIZE, PreparedCapture,
};
pub use clock::{AudioClock, FrameClock, ManualClock, SystemAudioClock};
pub use convert::{
    PCM16_STEP, bytes_to_transport_text, float_to_pcm16, pcm16_to_float, transport_text_to_bytes,
};
#[cfg(feature = "backend-cpal")]
pub use cpal_backend::{CpalAudioInput, CpalAudioOutput};
pub use device::{AudioInputDevice, AudioOutputDevice, InputStream, PlaybackSink, SampleCallback};
pub use null::{NullAudioInput, NullAudioOutput, NullPlaybackSink};
pub use resample::StreamResampler;
pub use scheduler::{
    AudioChunk, DecodedAudio, PlaybackBuffer, PlaybackScheduler, SchedulerStats, decode_chunk,
};

/// Default rate of audio produced by the remote service.
pub const DEFAULT_PLAYBACK_SAMPLE_RATE: u32 = 24000;
