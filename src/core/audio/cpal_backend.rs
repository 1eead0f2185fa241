//! Hardware audio devices via `cpal`.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream lives on a
//! dedicated thread that owns it for its whole life and takes commands over a
//! channel. Dropping or closing the handle stops that thread and releases the
//! device.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use parking_lot::Mutex;

use super::clock::{AudioClock, FrameClock};
use super::convert::downmix_to_mono;
use super::device::{AudioInputDevice, AudioOutputDevice, InputStream, PlaybackSink, SampleCallback};
use super::scheduler::PlaybackBuffer;
use crate::core::error::{LiveError, LiveResult};

enum StreamCommand {
    Play(mpsc::Sender<LiveResult<()>>),
    Close,
}

fn device_error(context: &str, e: impl std::fmt::Display) -> LiveError {
    LiveError::DeviceUnavailable(format!("{}: {}", context, e))
}

/// Spawn the thread owning a cpal stream. Returns the stream's sample rate.
fn spawn_stream_thread<B>(
    name: &str,
    build: B,
) -> LiveResult<(u32, mpsc::Sender<StreamCommand>, JoinHandle<()>)>
where
    B: FnOnce() -> LiveResult<(Stream, u32)> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel::<LiveResult<u32>>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<StreamCommand>();

    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while let Ok(command) = cmd_rx.recv() {
                match command {
                    StreamCommand::Play(reply) => {
                        let result = stream
                            .play()
                            .map_err(|e| device_error("failed to start stream", e));
                        let _ = reply.send(result);
                    }
                    StreamCommand::Close => break,
                }
            }
            drop(stream);
        })
        .map_err(|e| device_error("failed to spawn audio thread", e))?;

    match ready_rx.recv() {
        Ok(Ok(rate)) => Ok((rate, cmd_tx, handle)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(LiveError::DeviceUnavailable(
                "audio thread exited during setup".to_string(),
            ))
        }
    }
}

// =============================================================================
// Input
// =============================================================================

/// Default system microphone.
#[derive(Debug, Clone, Default)]
pub struct CpalAudioInput;

impl AudioInputDevice for CpalAudioInput {
    fn name(&self) -> String {
        cpal::default_host()
            .default_input_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_else(|| "default input".to_string())
    }

    fn open(
        &self,
        _requested_rate: u32,
        mut on_samples: SampleCallback,
    ) -> LiveResult<Box<dyn InputStream>> {
        let (sample_rate, commands, thread) = spawn_stream_thread("waav-cpal-input", move || {
            let host = cpal::default_host();
            let device = host.default_input_device().ok_or_else(|| {
                LiveError::DeviceUnavailable("no default input device".to_string())
            })?;
            let supported = device
                .default_input_config()
                .map_err(|e| device_error("input config unavailable", e))?;

            let channels = supported.channels();
            let rate = supported.sample_rate().0;
            let config: cpal::StreamConfig = supported.config();
            let on_error = |e| tracing::error!("Audio input stream error: {}", e);

            let stream = match supported.sample_format() {
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _| on_samples(&downmix_to_mono(data, channels)),
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _| {
                        let floats: Vec<f32> =
                            data.iter().map(|s| *s as f32 / 32768.0).collect();
                        on_samples(&downmix_to_mono(&floats, channels))
                    },
                    on_error,
                    None,
                ),
                other => {
                    return Err(LiveError::DeviceUnavailable(format!(
                        "unsupported input sample format {:?}",
                        other
                    )));
                }
            }
            .map_err(|e| device_error("failed to open input stream", e))?;

            Ok((stream, rate))
        })?;

        Ok(Box::new(CpalInputStream {
            sample_rate,
            commands: Some(commands),
            thread: Some(thread),
        }))
    }
}

struct CpalInputStream {
    sample_rate: u32,
    commands: Option<mpsc::Sender<StreamCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for CpalInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self) -> LiveResult<()> {
        let commands = self.commands.as_ref().ok_or(LiveError::NotConnected)?;
        let (reply_tx, reply_rx) = mpsc::channel();
        commands
            .send(StreamCommand::Play(reply_tx))
            .map_err(|e| device_error("input thread gone", e))?;
        reply_rx
            .recv()
            .map_err(|e| device_error("input thread gone", e))?
    }

    fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(StreamCommand::Close);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Output
// =============================================================================

/// Default system speaker.
#[derive(Debug, Clone, Default)]
pub struct CpalAudioOutput;

type SharedQueue = Arc<Mutex<VecDeque<PlaybackBuffer>>>;

/// Sample at absolute frame position `frame`, releasing finished buffers.
fn sample_at(queue: &mut VecDeque<PlaybackBuffer>, frame: u64, rate: u32) -> f32 {
    while let Some(front) = queue.front() {
        let start = (front.start_time * rate as f64).round() as u64;
        let end = start + front.samples.len() as u64;
        if frame >= end {
            queue.pop_front();
            continue;
        }
        if frame < start {
            return 0.0;
        }
        return front.samples[(frame - start) as usize];
    }
    0.0
}

impl AudioOutputDevice for CpalAudioOutput {
    fn name(&self) -> String {
        cpal::default_host()
            .default_output_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_else(|| "default output".to_string())
    }

    fn open(&self) -> LiveResult<Arc<dyn PlaybackSink>> {
        let queue: SharedQueue = Arc::new(Mutex::new(VecDeque::new()));
        let clock_slot: Arc<Mutex<Option<FrameClock>>> = Arc::new(Mutex::new(None));

        let render_queue = queue.clone();
        let render_clock = clock_slot.clone();
        let (sample_rate, commands, thread) = spawn_stream_thread("waav-cpal-output", move || {
            let host = cpal::default_host();
            let device = host.default_output_device().ok_or_else(|| {
                LiveError::DeviceUnavailable("no default output device".to_string())
            })?;
            let supported = device
                .default_output_config()
                .map_err(|e| device_error("output config unavailable", e))?;
            if supported.sample_format() != SampleFormat::F32 {
                return Err(LiveError::DeviceUnavailable(format!(
                    "unsupported output sample format {:?}",
                    supported.sample_format()
                )));
            }

            let channels = supported.channels().max(1) as usize;
            let rate = supported.sample_rate().0;
            let clock = FrameClock::new(rate);
            *render_clock.lock() = Some(clock.clone());
            let config: cpal::StreamConfig = supported.config();

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        let base = clock.frames();
                        let frames = data.len() / channels;
                        let mut queue = render_queue.lock();
                        for (i, frame) in data.chunks_mut(channels).enumerate() {
                            let sample = sample_at(&mut queue, base + i as u64, rate);
                            frame.iter_mut().for_each(|s| *s = sample);
                        }
                        drop(queue);
                        clock.advance(frames as u64);
                    },
                    |e| tracing::error!("Audio output stream error: {}", e),
                    None,
                )
                .map_err(|e| device_error("failed to open output stream", e))?;

            Ok((stream, rate))
        })?;

        let clock = clock_slot
            .lock()
            .take()
            .ok_or_else(|| LiveError::Internal("output clock not initialized".to_string()))?;

        let (reply_tx, reply_rx) = mpsc::channel();
        commands
            .send(StreamCommand::Play(reply_tx))
            .map_err(|e| device_error("output thread gone", e))?;
        reply_rx
            .recv()
            .map_err(|e| device_error("output thread gone", e))??;

        tracing::debug!(sample_rate, "Audio output device opened");

        Ok(Arc::new(CpalPlaybackSink {
            sample_rate,
            clock,
            queue,
            commands: Mutex::new(Some(commands)),
            thread: Mutex::new(Some(thread)),
        }))
    }
}

struct CpalPlaybackSink {
    sample_rate: u32,
    clock: FrameClock,
    queue: SharedQueue,
    commands: Mutex<Option<mpsc::Sender<StreamCommand>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSink for CpalPlaybackSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clock(&self) -> Arc<dyn AudioClock> {
        Arc::new(self.clock.clone())
    }

    fn enqueue(&self, buffer: PlaybackBuffer) {
        self.queue.lock().push_back(buffer);
    }

    fn flush(&self) {
        self.queue.lock().clear();
    }

    fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn close(&self) {
        if let Some(commands) = self.commands.lock().take() {
            let _ = commands.send(StreamCommand::Close);
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        self.queue.lock().clear();
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        self.close();
    }
}
