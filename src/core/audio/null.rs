//! Device backend without hardware.
//!
//! The input produces silence in real time from a background thread; the
//! output tracks a monotonic clock and releases buffers once their scheduled
//! end time has passed. Used for dry runs and whenever the `backend-cpal`
//! feature is disabled.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::clock::{AudioClock, SystemAudioClock};
use super::device::{AudioInputDevice, AudioOutputDevice, InputStream, PlaybackSink, SampleCallback};
use super::scheduler::PlaybackBuffer;
use crate::core::error::{LiveError, LiveResult};

/// Interval between silent input blocks.
const INPUT_BLOCK: Duration = Duration::from_millis(20);

/// Input device delivering silence at the requested rate.
#[derive(Debug, Clone, Default)]
pub struct NullAudioInput;

impl AudioInputDevice for NullAudioInput {
    fn name(&self) -> String {
        "null input".to_string()
    }

    fn open(
        &self,
        requested_rate: u32,
        on_samples: SampleCallback,
    ) -> LiveResult<Box<dyn InputStream>> {
        if requested_rate == 0 {
            return Err(LiveError::DeviceUnavailable(
                "null input cannot run at 0 Hz".to_string(),
            ));
        }
        Ok(Box::new(NullInputStream {
            sample_rate: requested_rate,
            callback: Some(on_samples),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }))
    }
}

struct NullInputStream {
    sample_rate: u32,
    callback: Option<SampleCallback>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for NullInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self) -> LiveResult<()> {
        let Some(mut callback) = self.callback.take() else {
            return Ok(());
        };

        let block_len = (self.sample_rate as u64 * INPUT_BLOCK.as_millis() as u64 / 1000) as usize;
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name("waav-null-input".to_string())
            .spawn(move || {
                let block = vec![0.0f32; block_len.max(1)];
                while running.load(Ordering::SeqCst) {
                    callback(&block);
                    std::thread::sleep(INPUT_BLOCK);
                }
            })
            .map_err(|e| LiveError::DeviceUnavailable(format!("null input thread: {}", e)))?;

        self.thread = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.callback = None;
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NullInputStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Output device that renders nothing but keeps time.
#[derive(Debug, Clone)]
pub struct NullAudioOutput {
    sample_rate: u32,
}

impl NullAudioOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl AudioOutputDevice for NullAudioOutput {
    fn name(&self) -> String {
        "null output".to_string()
    }

    fn open(&self) -> LiveResult<Arc<dyn PlaybackSink>> {
        if self.sample_rate == 0 {
            return Err(LiveError::DeviceUnavailable(
                "null output cannot run at 0 Hz".to_string(),
            ));
        }
        Ok(Arc::new(NullPlaybackSink::new(
            self.sample_rate,
            Arc::new(SystemAudioClock::new()),
        )))
    }
}

/// Sink that holds each buffer until its scheduled end time passes.
pub struct NullPlaybackSink {
    sample_rate: u32,
    clock: Arc<dyn AudioClock>,
    queue: Mutex<VecDeque<PlaybackBuffer>>,
    closed: AtomicBool,
}

impl NullPlaybackSink {
    pub fn new(sample_rate: u32, clock: Arc<dyn AudioClock>) -> Self {
        Self {
            sample_rate,
            clock,
            queue: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn release_finished(&self, queue: &mut VecDeque<PlaybackBuffer>) {
        let now = self.clock.now();
        while queue.front().is_some_and(|b| b.end_time() <= now) {
            queue.pop_front();
        }
    }
}

impl PlaybackSink for NullPlaybackSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clock(&self) -> Arc<dyn AudioClock> {
        self.clock.clone()
    }

    fn enqueue(&self, buffer: PlaybackBuffer) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut queue = self.queue.lock();
        self.release_finished(&mut queue);
        queue.push_back(buffer);
    }

    fn flush(&self) {
        self.queue.lock().clear();
    }

    fn pending(&self) -> usize {
        let mut queue = self.queue.lock();
        self.release_finished(&mut queue);
        queue.len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.queue.lock().clear();
    }
}
