//! Microphone capture pipeline.
//!
//! Device callbacks deliver arbitrary-sized blocks at the device rate. The
//! pipeline resamples them to the target rate, slices them into fixed-size
//! [`AudioFrame`]s and hands each frame to the caller's callback on the
//! device thread. The callback must not block; forwarding to the transport
//! is fire-and-forget.
//!
//! Stop semantics: the frame callback lives in a mutex-guarded slot that
//! [`CaptureHandle::stop`] empties before closing the device, so once `stop`
//! returns no further frames are delivered, whichever thread calls it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use super::convert::float_to_pcm16;
use super::device::{AudioInputDevice, InputStream};
use super::resample::StreamResampler;
use crate::core::error::{LiveError, LiveResult};

/// Default capture rate expected by the remote service.
pub const DEFAULT_CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Default number of samples per outbound frame.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Capture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Rate of the frames handed to the callback
    pub sample_rate: u32,
    /// Samples per frame
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }
}

/// A fixed-length block of captured samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Capture order, starting at 0
    pub seq: u64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }

    /// Convert to little-endian PCM16, consuming the frame.
    pub fn into_pcm16(self) -> Bytes {
        Bytes::from(float_to_pcm16(&self.samples))
    }
}

/// Frame callback type.
pub type FrameCallback = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// Accumulates device blocks into fixed-size frames.
struct FrameAssembler {
    resampler: StreamResampler,
    config: CaptureConfig,
    pending: Vec<f32>,
    next_seq: u64,
    on_frame: FrameCallback,
    frames_emitted: Arc<AtomicU64>,
}

impl FrameAssembler {
    fn push(&mut self, block: &[f32]) {
        if self.resampler.is_passthrough() {
            self.pending.extend_from_slice(block);
        } else {
            match self.resampler.process(block) {
                Ok(samples) => self.pending.extend(samples),
                Err(e) => {
                    tracing::warn!("Dropping capture block: {}", e);
                    return;
                }
            }
        }

        while self.pending.len() >= self.config.frame_size {
            let rest = self.pending.split_off(self.config.frame_size);
            let samples = std::mem::replace(&mut self.pending, rest);
            let frame = AudioFrame {
                seq: self.next_seq,
                sample_rate: self.config.sample_rate,
                samples,
            };
            self.next_seq += 1;
            self.frames_emitted.fetch_add(1, Ordering::Relaxed);
            (self.on_frame)(frame);
        }
    }
}

type AssemblerSlot = Arc<Mutex<Option<FrameAssembler>>>;

/// Owns the microphone device and produces [`AudioFrame`]s.
pub struct CapturePipeline {
    device: Arc<dyn AudioInputDevice>,
    config: CaptureConfig,
}

impl CapturePipeline {
    pub fn new(device: Arc<dyn AudioInputDevice>, config: CaptureConfig) -> LiveResult<Self> {
        if config.sample_rate == 0 || config.frame_size == 0 {
            return Err(LiveError::InvalidConfiguration(
                "capture sample rate and frame size must be positive".to_string(),
            ));
        }
        Ok(Self { device, config })
    }

    pub fn config(&self) -> CaptureConfig {
        self.config
    }

    /// Acquire the input device without delivering any frames yet.
    ///
    /// # Errors
    ///
    /// [`LiveError::DeviceUnavailable`] if the device cannot be opened.
    pub fn prepare(&self) -> LiveResult<PreparedCapture> {
        let slot: AssemblerSlot = Arc::new(Mutex::new(None));
        let callback_slot = slot.clone();

        let stream = self.device.open(
            self.config.sample_rate,
            Box::new(move |block: &[f32]| {
                if let Some(assembler) = callback_slot.lock().as_mut() {
                    assembler.push(block);
                }
            }),
        )?;

        tracing::debug!(
            device = %self.device.name(),
            device_rate = stream.sample_rate(),
            target_rate = self.config.sample_rate,
            "Audio input device acquired"
        );

        Ok(PreparedCapture {
            stream,
            slot,
            config: self.config,
        })
    }

    /// Acquire the device and start delivering frames to `on_frame`.
    pub fn start<F>(&self, on_frame: F) -> LiveResult<CaptureHandle>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        self.prepare()?.start(on_frame)
    }
}

/// An acquired but idle input device. Dropping it releases the device.
pub struct PreparedCapture {
    stream: Box<dyn InputStream>,
    slot: AssemblerSlot,
    config: CaptureConfig,
}

impl PreparedCapture {
    /// Rate the device actually delivers.
    pub fn device_rate(&self) -> u32 {
        self.stream.sample_rate()
    }

    /// Begin delivering frames.
    pub fn start<F>(mut self, on_frame: F) -> LiveResult<CaptureHandle>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        let resampler = StreamResampler::new(self.stream.sample_rate(), self.config.sample_rate)?;
        let frames_emitted = Arc::new(AtomicU64::new(0));
        *self.slot.lock() = Some(FrameAssembler {
            resampler,
            config: self.config,
            pending: Vec::with_capacity(self.config.frame_size * 2),
            next_seq: 0,
            on_frame: Box::new(on_frame),
            frames_emitted: frames_emitted.clone(),
        });

        if let Err(e) = self.stream.play() {
            self.slot.lock().take();
            self.stream.close();
            return Err(e);
        }

        tracing::info!(
            sample_rate = self.config.sample_rate,
            frame_size = self.config.frame_size,
            "Audio capture started"
        );

        Ok(CaptureHandle {
            stream: Some(self.stream),
            slot: self.slot,
            stopped: AtomicBool::new(false),
            frames_emitted,
        })
    }
}

/// A running capture. Stops on drop.
pub struct CaptureHandle {
    stream: Option<Box<dyn InputStream>>,
    slot: AssemblerSlot,
    stopped: AtomicBool,
    frames_emitted: Arc<AtomicU64>,
}

impl CaptureHandle {
    /// Number of frames delivered so far.
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Release the device. Returns `false` if it was already stopped.
    ///
    /// Must not be called from inside the frame callback.
    pub fn stop(&mut self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(assembler) = self.slot.lock().take()
            && !assembler.pending.is_empty()
        {
            tracing::debug!(
                samples = assembler.pending.len(),
                "Discarding partial capture frame at stop"
            );
        }

        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }

        tracing::info!(frames = self.frames_emitted(), "Audio capture stopped");
        true
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
