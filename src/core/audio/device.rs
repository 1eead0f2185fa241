//! Audio device abstractions.
//!
//! Backends implement these traits; the capture pipeline and playback
//! scheduler only ever talk to them. Input and output rates are reported by
//! the opened stream and never assumed equal.

use std::sync::Arc;

use super::clock::AudioClock;
use super::scheduler::PlaybackBuffer;
use crate::core::error::LiveResult;

/// Callback receiving mono float samples from the device thread.
///
/// Must return quickly; it runs on the device's own timing.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A source of microphone samples.
pub trait AudioInputDevice: Send + Sync {
    /// Human readable device name.
    fn name(&self) -> String;

    /// Open the device, preferring `requested_rate`.
    ///
    /// The returned stream does not deliver samples until [`InputStream::play`].
    ///
    /// # Errors
    ///
    /// [`LiveError::DeviceUnavailable`](crate::core::error::LiveError::DeviceUnavailable)
    /// when no device exists or permission is denied.
    fn open(&self, requested_rate: u32, on_samples: SampleCallback)
    -> LiveResult<Box<dyn InputStream>>;
}

/// An opened input stream. Dropping it releases the device.
pub trait InputStream: Send {
    /// Actual rate of the mono samples delivered to the callback.
    fn sample_rate(&self) -> u32;

    /// Start delivering samples.
    fn play(&mut self) -> LiveResult<()>;

    /// Stop the stream and release the device. Idempotent.
    fn close(&mut self);
}

/// A sink for scheduled audio playback.
pub trait AudioOutputDevice: Send + Sync {
    /// Human readable device name.
    fn name(&self) -> String;

    /// Open the output and start its clock.
    fn open(&self) -> LiveResult<Arc<dyn PlaybackSink>>;
}

/// An opened output that plays buffers at their scheduled start times.
pub trait PlaybackSink: Send + Sync {
    /// Rate the sink renders at.
    fn sample_rate(&self) -> u32;

    /// The clock scheduled start times refer to.
    fn clock(&self) -> Arc<dyn AudioClock>;

    /// Queue a buffer for playback at `buffer.start_time`.
    fn enqueue(&self, buffer: PlaybackBuffer);

    /// Discard every buffer that has not finished playing.
    fn flush(&self);

    /// Number of buffers queued and not yet released.
    fn pending(&self) -> usize;

    /// Stop rendering and release the device. Idempotent.
    fn close(&self);
}
