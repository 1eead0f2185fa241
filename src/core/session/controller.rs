//! Session Controller.
//!
//! Owns one live conversation: the transport, the capture pipeline, the
//! playback scheduler and an optional video pipeline. Everything acquired on
//! `connect` is released as a unit on `disconnect`, on transport failure, or
//! when the session is dropped.
//!
//! Three activities run concurrently once the session is active:
//!
//! - capture, on the input device's own thread, queues PCM frames without
//!   waiting for the network
//! - the event loop task decodes inbound chunks and schedules them; it is
//!   the only writer of the playback schedule
//! - the video timer task samples, compresses and queues frames
//!
//! They share no mutable buffers. Frames and chunks are handed over by value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::{SessionState, StateCell};
use crate::core::audio::{
    AudioChunk, AudioFrame, AudioInputDevice, AudioOutputDevice, CaptureConfig, CaptureHandle,
    CapturePipeline, DEFAULT_PLAYBACK_SAMPLE_RATE, PlaybackScheduler, PlaybackSink,
    PreparedCapture,
};
use crate::core::error::{LiveError, LiveResult};
use crate::core::transport::{BoxedTransport, MediaSender, TransportChannel, TransportEvent};
use crate::core::video::{
    ModeProfile, VideoFrame, VideoFramePipeline, VideoHandle, VideoPipelineConfig, VideoSource,
    VideoSourceProvider, VisualMode,
};

/// Default bound on the `Connecting` state.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for the event loop to finish during disconnect.
const EVENT_LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Called with `true` when the agent starts producing audio and `false`
/// when it stops. Only changes are signalled.
pub type AgentAudioActivityCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Called for every failure surfaced to the caller.
pub type SessionErrorCallback = Arc<dyn Fn(&LiveError) + Send + Sync>;

// =============================================================================
// Options and devices
// =============================================================================

/// Tunables for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub capture: CaptureConfig,
    /// Rate assumed for inbound chunks that do not advertise one
    pub playback_sample_rate: u32,
    pub handshake_timeout: Duration,
    pub video: VideoPipelineConfig,
    /// Mode used on the next `connect`
    pub initial_mode: VisualMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            playback_sample_rate: DEFAULT_PLAYBACK_SAMPLE_RATE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            video: VideoPipelineConfig::default(),
            initial_mode: VisualMode::None,
        }
    }
}

impl SessionOptions {
    pub fn validate(&self) -> LiveResult<()> {
        if self.capture.sample_rate == 0 || self.capture.frame_size == 0 {
            return Err(LiveError::InvalidConfiguration(
                "capture sample rate and frame size must be positive".to_string(),
            ));
        }
        if self.playback_sample_rate == 0 {
            return Err(LiveError::InvalidConfiguration(
                "playback sample rate must be positive".to_string(),
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(LiveError::InvalidConfiguration(
                "handshake timeout must be positive".to_string(),
            ));
        }
        self.video.validate()
    }
}

/// Devices a session acquires on connect.
#[derive(Clone)]
pub struct SessionDevices {
    pub audio_input: Arc<dyn AudioInputDevice>,
    pub audio_output: Arc<dyn AudioOutputDevice>,
    pub video: Option<Arc<dyn VideoSourceProvider>>,
}

impl SessionDevices {
    pub fn new(
        audio_input: Arc<dyn AudioInputDevice>,
        audio_output: Arc<dyn AudioOutputDevice>,
    ) -> Self {
        Self {
            audio_input,
            audio_output,
            video: None,
        }
    }

    pub fn with_video(mut self, provider: Arc<dyn VideoSourceProvider>) -> Self {
        self.video = Some(provider);
        self
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct SessionCounters {
    audio_frames_sent: AtomicU64,
    audio_frames_dropped: AtomicU64,
    chunks_scheduled: AtomicU64,
    chunks_dropped: AtomicU64,
    video_frames_sent: AtomicU64,
    video_frames_skipped: AtomicU64,
}

/// Snapshot of session counters. Counters accumulate across reconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Captured frames queued for the transport
    pub audio_frames_sent: u64,
    /// Captured frames dropped because the outbound queue was full or closed
    pub audio_frames_dropped: u64,
    /// Inbound chunks placed on the playback schedule
    pub chunks_scheduled: u64,
    /// Inbound chunks that failed to decode
    pub chunks_dropped: u64,
    /// Video frames queued for the transport
    pub video_frames_sent: u64,
    /// Video frames skipped because the previous one was still pending
    pub video_frames_skipped: u64,
}

impl SessionCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            audio_frames_sent: self.audio_frames_sent.load(Ordering::Relaxed),
            audio_frames_dropped: self.audio_frames_dropped.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            video_frames_sent: self.video_frames_sent.load(Ordering::Relaxed),
            video_frames_skipped: self.video_frames_skipped.load(Ordering::Relaxed),
        }
    }
}

fn audio_forwarder(
    media: MediaSender,
    counters: Arc<SessionCounters>,
) -> impl FnMut(AudioFrame) + Send + 'static {
    move |frame: AudioFrame| {
        let seq = frame.seq;
        match media.try_send_audio(frame.into_pcm16()) {
            Ok(true) => {
                counters.audio_frames_sent.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(seq, "Audio frame queued");
            }
            Ok(false) => {
                counters.audio_frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(seq, "Outbound audio queue full, frame dropped");
            }
            Err(_) => {
                counters.audio_frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(seq, "Transport closed, audio frame dropped");
            }
        }
    }
}

fn video_forwarder(
    media: MediaSender,
    counters: Arc<SessionCounters>,
) -> impl FnMut(VideoFrame) + Send + 'static {
    move |frame: VideoFrame| {
        let seq = frame.seq;
        match media.try_send_video(frame.data) {
            Ok(true) => {
                counters.video_frames_sent.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(seq, width = frame.width, height = frame.height, "Video frame queued");
            }
            Ok(false) => {
                counters.video_frames_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(seq, "Previous video frame still pending, frame skipped");
            }
            Err(_) => {
                counters.video_frames_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(seq, "Transport closed, video frame skipped");
            }
        }
    }
}

// =============================================================================
// Session internals
// =============================================================================

/// Devices acquired before the transport is opened.
struct PreparedDevices {
    capture: PreparedCapture,
    sink: Arc<dyn PlaybackSink>,
    video_source: Option<Box<dyn VideoSource>>,
}

/// Everything owned by an active session.
struct ActiveResources {
    capture: CaptureHandle,
    video: Option<VideoHandle>,
    sink: Arc<dyn PlaybackSink>,
    media: MediaSender,
    cancel: CancellationToken,
    event_loop: Option<JoinHandle<()>>,
}

impl Drop for ActiveResources {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.capture.stop();
        if let Some(video) = self.video.as_mut() {
            video.stop();
        }
        self.sink.close();
    }
}

#[derive(Default)]
struct Callbacks {
    agent_audio_activity: RwLock<Option<AgentAudioActivityCallback>>,
    error: RwLock<Option<SessionErrorCallback>>,
}

struct SessionInner {
    id: String,
    created_at: OffsetDateTime,
    options: SessionOptions,
    devices: SessionDevices,
    state: StateCell,
    visual_mode: Mutex<VisualMode>,
    transport: tokio::sync::Mutex<BoxedTransport>,
    resources: Mutex<Option<ActiveResources>>,
    callbacks: Callbacks,
    counters: Arc<SessionCounters>,
    agent_active: AtomicBool,
    /// Incremented on every connect so a stale event loop cannot fail a newer connection
    epoch: AtomicU64,
    /// Held by connect, disconnect and failure handling for their whole
    /// duration, so each sees the others' teardown completed
    lifecycle: tokio::sync::Mutex<()>,
    /// Fired by disconnect to abandon an in-flight handshake
    connect_cancel: Mutex<Option<CancellationToken>>,
}

/// Wait for the open acknowledgment on a freshly opened channel.
async fn open_and_acknowledge(transport: &mut BoxedTransport) -> LiveResult<TransportChannel> {
    let mut channel = transport.open().await?;
    loop {
        match channel.events.recv().await {
            Some(TransportEvent::Opened) => return Ok(channel),
            Some(TransportEvent::Error(message)) => return Err(LiveError::Transport(message)),
            Some(TransportEvent::Closed { reason }) => {
                return Err(LiveError::Transport(format!(
                    "closed during handshake: {}",
                    reason.unwrap_or_else(|| "no reason given".to_string())
                )));
            }
            Some(other) => {
                tracing::debug!(event = ?other, "Ignoring event before open acknowledgment");
            }
            None => {
                return Err(LiveError::Transport(
                    "event stream ended during handshake".to_string(),
                ));
            }
        }
    }
}

impl SessionInner {
    fn emit_error(&self, error: &LiveError) {
        let callback = self.callbacks.error.read().clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    fn set_agent_active(&self, active: bool) {
        if self.agent_active.swap(active, Ordering::SeqCst) == active {
            return;
        }
        tracing::debug!(active, "Agent audio activity changed");
        let callback = self.callbacks.agent_audio_activity.read().clone();
        if let Some(callback) = callback {
            callback(active);
        }
    }

    fn open_video_source(&self, mode: VisualMode) -> LiveResult<Box<dyn VideoSource>> {
        let provider = self.devices.video.as_ref().ok_or_else(|| {
            LiveError::DeviceUnavailable(format!("no video source available for {}", mode))
        })?;
        provider.open(mode)
    }

    fn prepare_devices(&self, mode: VisualMode) -> LiveResult<PreparedDevices> {
        let pipeline = CapturePipeline::new(self.devices.audio_input.clone(), self.options.capture)?;
        let capture = pipeline.prepare()?;
        let video_source = if mode.is_active() {
            Some(self.open_video_source(mode)?)
        } else {
            None
        };
        let sink = self.devices.audio_output.open()?;
        Ok(PreparedDevices {
            capture,
            sink,
            video_source,
        })
    }

    async fn open_transport(&self) -> LiveResult<TransportChannel> {
        let timeout = self.options.handshake_timeout;
        let mut transport = self.transport.lock().await;
        match tokio::time::timeout(timeout, open_and_acknowledge(&mut transport)).await {
            Ok(result) => result,
            Err(_) => Err(LiveError::Transport(format!(
                "handshake timed out after {:?}",
                timeout
            ))),
        }
    }

    async fn close_transport(&self) {
        if let Err(e) = self.transport.lock().await.close().await {
            tracing::warn!("Failed to close transport: {}", e);
        }
    }

    /// Clean up after a failed connect attempt.
    async fn abort_connect(&self, error: &LiveError) {
        self.close_transport().await;
        if self
            .state
            .compare_and_transition(SessionState::Connecting, SessionState::Error)
        {
            tracing::error!(session_id = %self.id, "Session failed to connect: {}", error);
            self.emit_error(error);
        } else if self.state.get() == SessionState::Closing {
            let _ = self.state.transition(SessionState::Closed);
        }
    }

    /// Open the transport and start streaming. The state is `Connecting`.
    async fn establish(
        self: &Arc<Self>,
        mode: VisualMode,
        prepared: PreparedDevices,
        cancel: &CancellationToken,
    ) -> LiveResult<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(session_id = %self.id, mode = %mode, "Connecting session");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LiveError::InvalidState(
                "session closed while connecting".to_string(),
            )),
            result = self.open_transport() => result,
        };

        let channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                prepared.sink.close();
                drop(prepared);
                self.abort_connect(&e).await;
                return Err(e);
            }
        };

        self.activate(epoch, mode, prepared, channel).await
    }

    async fn activate(
        self: &Arc<Self>,
        epoch: u64,
        mode: VisualMode,
        prepared: PreparedDevices,
        channel: TransportChannel,
    ) -> LiveResult<()> {
        let TransportChannel { sender, events } = channel;
        let PreparedDevices {
            capture,
            sink,
            video_source,
        } = prepared;

        // Disconnected while the handshake completed: never start the devices.
        if self.state.get() != SessionState::Connecting {
            sink.close();
            drop(capture);
            drop(video_source);
            drop(sender);
            drop(events);
            let error = LiveError::InvalidState("session closed while connecting".to_string());
            self.abort_connect(&error).await;
            return Err(error);
        }

        let capture = match capture.start(audio_forwarder(sender.clone(), self.counters.clone())) {
            Ok(handle) => handle,
            Err(e) => {
                sink.close();
                self.abort_connect(&e).await;
                return Err(e);
            }
        };

        let video = match video_source {
            Some(source) => match VideoFramePipeline::start(
                source,
                mode,
                self.options.video,
                video_forwarder(sender.clone(), self.counters.clone()),
            ) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    drop(capture);
                    sink.close();
                    self.abort_connect(&e).await;
                    return Err(e);
                }
            },
            None => None,
        };

        let scheduler = PlaybackScheduler::new(sink.clone(), self.options.playback_sample_rate);
        let cancel = CancellationToken::new();
        let event_loop = tokio::spawn(run_event_loop(
            Arc::downgrade(self),
            epoch,
            events,
            scheduler,
            cancel.clone(),
        ));

        let resources = ActiveResources {
            capture,
            video,
            sink,
            media: sender,
            cancel,
            event_loop: Some(event_loop),
        };

        let rejected = {
            let mut slot = self.resources.lock();
            if self
                .state
                .compare_and_transition(SessionState::Connecting, SessionState::Active)
            {
                *slot = Some(resources);
                None
            } else {
                Some(resources)
            }
        };

        match rejected {
            None => {
                tracing::info!(session_id = %self.id, mode = %mode, "Session active");
                Ok(())
            }
            Some(resources) => {
                self.release(resources, true).await;
                if self.state.get() == SessionState::Closing {
                    let _ = self.state.transition(SessionState::Closed);
                    Err(LiveError::InvalidState(
                        "session closed while connecting".to_string(),
                    ))
                } else {
                    Err(LiveError::Transport(
                        "transport failed while starting session".to_string(),
                    ))
                }
            }
        }
    }

    /// Release one set of resources. `join_event_loop` must be false when
    /// called from the event loop itself.
    async fn release(&self, mut resources: ActiveResources, join_event_loop: bool) {
        resources.cancel.cancel();
        resources.capture.stop();
        if let Some(mut video) = resources.video.take() {
            video.stop();
        }
        resources.sink.close();

        if let Some(task) = resources.event_loop.take()
            && join_event_loop
            && tokio::time::timeout(EVENT_LOOP_JOIN_TIMEOUT, task).await.is_err()
        {
            tracing::warn!("Event loop did not exit in time");
        }

        drop(resources);
        self.close_transport().await;
        self.set_agent_active(false);
        tracing::debug!(session_id = %self.id, "Session resources released");
    }

    async fn teardown(&self, join_event_loop: bool) {
        let taken = self.resources.lock().take();
        if let Some(resources) = taken {
            self.release(resources, join_event_loop).await;
        }
    }

    /// Fatal transport failure reported by the event loop.
    ///
    /// Gives up without touching the session once `cancel` fires, which is
    /// how a concurrent disconnect that already owns the lifecycle stops it.
    async fn fail(&self, epoch: u64, cancel: &CancellationToken, error: LiveError) {
        let _lifecycle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            guard = self.lifecycle.lock() => guard,
        };
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        let moved = self
            .state
            .compare_and_transition(SessionState::Active, SessionState::Error);
        if !moved {
            tracing::debug!(state = %self.state.get(), "Ignoring transport failure");
            return;
        }

        tracing::error!(session_id = %self.id, "Session failed: {}", error);
        self.teardown(false).await;
        self.emit_error(&error);
    }

    fn route_audio(&self, scheduler: &mut PlaybackScheduler, chunk: &AudioChunk) {
        match scheduler.schedule_chunk(chunk) {
            Ok(buffer) => {
                self.counters.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    seq = buffer.seq,
                    start = buffer.start_time,
                    duration = buffer.duration,
                    "Chunk scheduled"
                );
                self.set_agent_active(true);
            }
            Err(e) => {
                self.counters.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                self.emit_error(&e);
            }
        }
    }
}

async fn run_event_loop(
    session: Weak<SessionInner>,
    epoch: u64,
    mut events: mpsc::Receiver<TransportEvent>,
    mut scheduler: PlaybackScheduler,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(session) = session.upgrade() else {
            break;
        };

        match event {
            Some(TransportEvent::AudioChunk(chunk)) => session.route_audio(&mut scheduler, &chunk),
            Some(TransportEvent::TurnComplete) => {
                tracing::debug!("Agent turn complete");
                match scheduler.finish_turn() {
                    Ok(Some(tail)) => {
                        tracing::trace!(seq = tail.seq, duration = tail.duration, "Turn tail scheduled");
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Failed to schedule end of turn: {}", e),
                }
                session.set_agent_active(false);
            }
            Some(TransportEvent::Interrupted) => {
                tracing::debug!("Agent interrupted, flushing playback");
                scheduler.interrupt();
                session.set_agent_active(false);
            }
            Some(TransportEvent::Opened) => {
                tracing::debug!("Duplicate open acknowledgment ignored");
            }
            Some(TransportEvent::Error(message)) => {
                session
                    .fail(epoch, &cancel, LiveError::Transport(message))
                    .await;
                break;
            }
            Some(TransportEvent::Closed { reason }) => {
                let message = match reason {
                    Some(reason) => format!("connection closed by remote: {}", reason),
                    None => "connection closed by remote".to_string(),
                };
                session.fail(epoch, &cancel, LiveError::Transport(message)).await;
                break;
            }
            None => {
                session
                    .fail(
                        epoch,
                        &cancel,
                        LiveError::Transport("event stream ended".to_string()),
                    )
                    .await;
                break;
            }
        }
    }

    tracing::debug!(epoch, "Session event loop exited");
}

// =============================================================================
// Public handle
// =============================================================================

/// A live, bidirectional multimedia conversation.
///
/// # Example
///
/// ```rust,ignore
/// let session = LiveSession::new(transport, devices, SessionOptions::default())?;
/// session.on_agent_audio_activity(|speaking| println!("agent speaking: {}", speaking));
/// session.on_error(|e| eprintln!("session error: {}", e));
///
/// session.connect().await?;
/// session.set_visual_mode(VisualMode::ScreenShare)?;
/// session.disconnect().await?;
/// ```
pub struct LiveSession {
    inner: Arc<SessionInner>,
}

impl LiveSession {
    pub fn new(
        transport: BoxedTransport,
        devices: SessionDevices,
        options: SessionOptions,
    ) -> LiveResult<Self> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                id: uuid::Uuid::new_v4().to_string(),
                created_at: OffsetDateTime::now_utc(),
                options,
                devices,
                state: StateCell::default(),
                visual_mode: Mutex::new(options.initial_mode),
                transport: tokio::sync::Mutex::new(transport),
                resources: Mutex::new(None),
                callbacks: Callbacks::default(),
                counters: Arc::new(SessionCounters::default()),
                agent_active: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                lifecycle: tokio::sync::Mutex::new(()),
                connect_cancel: Mutex::new(None),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.inner.created_at
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    pub fn visual_mode(&self) -> VisualMode {
        *self.inner.visual_mode.lock()
    }

    /// Scale and quality applied to the next video frame, if video is on.
    pub fn video_profile(&self) -> Option<ModeProfile> {
        self.inner.options.video.profiles.for_mode(self.visual_mode())
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// Whether the agent is currently producing audio.
    pub fn is_agent_active(&self) -> bool {
        self.inner.agent_active.load(Ordering::SeqCst)
    }

    /// Whether the capture pipeline is running.
    pub fn is_capturing(&self) -> bool {
        self.inner
            .resources
            .lock()
            .as_ref()
            .is_some_and(|r| !r.capture.is_stopped())
    }

    /// Whether the video pipeline is running.
    pub fn is_video_active(&self) -> bool {
        self.inner
            .resources
            .lock()
            .as_ref()
            .and_then(|r| r.video.as_ref())
            .is_some_and(|v| !v.is_stopped())
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }

    /// Register the agent audio activity callback, replacing any previous one.
    pub fn on_agent_audio_activity<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self.inner.callbacks.agent_audio_activity.write() = Some(Arc::new(callback));
    }

    /// Register the error callback, replacing any previous one.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&LiveError) + Send + Sync + 'static,
    {
        *self.inner.callbacks.error.write() = Some(Arc::new(callback));
    }

    /// Acquire devices, open the transport and start streaming.
    ///
    /// Devices are acquired before the transport is opened, so a denied
    /// microphone or camera fails with [`LiveError::DeviceUnavailable`]
    /// without leaving the current state or touching the network. Capture
    /// starts only after the transport acknowledges the session.
    ///
    /// # Errors
    ///
    /// - [`LiveError::InvalidState`] unless the session is idle, closed or
    ///   errored, or when [`disconnect`](Self::disconnect) interrupts the handshake
    /// - [`LiveError::DeviceUnavailable`] when a device cannot be opened
    /// - [`LiveError::Transport`] when the channel fails or the handshake times out
    pub async fn connect(&self) -> LiveResult<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        let state = inner.state.get();
        if !state.can_connect() {
            return Err(LiveError::InvalidState(format!(
                "cannot connect while {}",
                state
            )));
        }

        let mode = *inner.visual_mode.lock();
        let prepared = inner.prepare_devices(mode)?;

        let cancel = CancellationToken::new();
        *inner.connect_cancel.lock() = Some(cancel.clone());
        let result = match inner.state.transition(SessionState::Connecting) {
            Ok(_) => inner.establish(mode, prepared, &cancel).await,
            Err(e) => Err(e),
        };
        inner.connect_cancel.lock().take();
        result
    }

    /// End the session, releasing every device and the transport.
    ///
    /// Safe from any state and safe to call repeatedly. No callback fires
    /// after this returns.
    pub async fn disconnect(&self) -> LiveResult<()> {
        let inner = &self.inner;
        if inner
            .state
            .compare_and_transition(SessionState::Connecting, SessionState::Closing)
        {
            tracing::debug!("Disconnect requested while connecting");
            if let Some(cancel) = inner.connect_cancel.lock().as_ref() {
                cancel.cancel();
            }
        }

        // Waits for an in-flight connect or failure to finish its teardown.
        let _lifecycle = inner.lifecycle.lock().await;
        if inner
            .state
            .compare_and_transition(SessionState::Active, SessionState::Closing)
        {
            inner.teardown(true).await;
            inner.state.transition(SessionState::Closed)?;
            tracing::info!(session_id = %inner.id, "Session closed");
            return Ok(());
        }

        inner.teardown(true).await;
        Ok(())
    }

    /// Switch the visual mode.
    ///
    /// While active the new source is opened first; if that fails with
    /// [`LiveError::DeviceUnavailable`] the previous mode keeps running and
    /// the session stays active. While not active the mode is remembered
    /// for the next `connect`.
    pub fn set_visual_mode(&self, mode: VisualMode) -> LiveResult<()> {
        let inner = &self.inner;
        let mut current = inner.visual_mode.lock();
        if *current == mode {
            return Ok(());
        }
        let previous = *current;

        if inner.state.get() != SessionState::Active {
            *current = mode;
            tracing::debug!(from = %previous, to = %mode, "Visual mode stored for next connect");
            return Ok(());
        }

        let source = if mode.is_active() {
            Some(inner.open_video_source(mode)?)
        } else {
            None
        };

        {
            let mut slot = inner.resources.lock();
            if let Some(resources) = slot.as_mut() {
                match source {
                    None => {
                        if let Some(mut video) = resources.video.take() {
                            video.stop();
                        }
                    }
                    Some(source) => match resources.video.as_ref() {
                        Some(video) => {
                            video.switch(source, mode);
                        }
                        None => {
                            let handle = VideoFramePipeline::start(
                                source,
                                mode,
                                inner.options.video,
                                video_forwarder(resources.media.clone(), inner.counters.clone()),
                            )?;
                            resources.video = Some(handle);
                        }
                    },
                }
            }
        }

        *current = mode;
        tracing::info!(session_id = %inner.id, from = %previous, to = %mode, "Visual mode switched");
        Ok(())
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // Devices are released synchronously by ActiveResources::drop; the
        // transport shuts down when the inner state is dropped.
        let taken = self.inner.resources.lock().take();
        if taken.is_some() {
            tracing::debug!(session_id = %self.inner.id, "Session dropped while active");
        }
        drop(taken);
    }
}
