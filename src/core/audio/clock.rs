//! Audio clock abstraction.
//!
//! Times are seconds in the audio-clock domain. A clock never runs backward
//! and may be read concurrently from any thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Read-only monotonic time source used for playback scheduling.
pub trait AudioClock: Send + Sync {
    /// Current time in seconds.
    fn now(&self) -> f64;
}

/// Monotonic clock backed by [`Instant`], starting at zero on creation.
#[derive(Debug, Clone)]
pub struct SystemAudioClock {
    origin: Instant,
}

impl SystemAudioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemAudioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemAudioClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock derived from the number of frames an output device has rendered.
///
/// The output callback advances it; readers see `frames / sample_rate`.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Record that `count` more frames have been rendered.
    pub fn advance(&self, count: u64) {
        self.frames.fetch_add(count, Ordering::AcqRel);
    }

    /// Total frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Clock that only moves when told to. Used for simulations and tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<parking_lot::Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(parking_lot::Mutex::new(start)),
        }
    }

    /// Move the clock to `time`. Earlier values are ignored.
    pub fn set(&self, time: f64) {
        let mut now = self.now.lock();
        if time > *now {
            *now = time;
        }
    }

    pub fn advance(&self, seconds: f64) {
        let mut now = self.now.lock();
        *now += seconds.max(0.0);
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}
