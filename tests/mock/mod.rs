//! Mock Devices and Transports
//!
//! In-process stand-ins for everything a live session talks to:
//! - A manually driven microphone that can refuse permission
//! - A recording speaker on a controllable clock
//! - A scriptable transport that records outbound media
//! - A mock Gemini Live WebSocket server

// Allow dead code in test infrastructure - not every test uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use waav_live::core::audio::{
    AudioChunk, AudioClock, AudioInputDevice, AudioOutputDevice, InputStream, ManualClock,
    PlaybackBuffer, PlaybackSink, SampleCallback, bytes_to_transport_text, float_to_pcm16,
};
use waav_live::core::transport::{
    OutboundMedia, Transport, TransportChannel, TransportEvent, media_channel,
};
use waav_live::{LiveError, LiveResult};

// =============================================================================
// Input
// =============================================================================

type CallbackSlot = Arc<Mutex<Option<SampleCallback>>>;

/// Microphone whose samples are pushed by the test.
#[derive(Default)]
pub struct ManualInput {
    deny: AtomicBool,
    opens: AtomicU64,
    callback: CallbackSlot,
    playing: Arc<AtomicBool>,
}

impl ManualInput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse the next opens as if permission was denied.
    pub fn deny_permission(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Deliver samples as the device thread would. Returns false when the
    /// stream is not running.
    pub fn push(&self, samples: &[f32]) -> bool {
        if !self.is_playing() {
            return false;
        }
        let mut slot = self.callback.lock();
        match slot.as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }
}

impl AudioInputDevice for ManualInput {
    fn name(&self) -> String {
        "manual input".to_string()
    }

    fn open(
        &self,
        requested_rate: u32,
        on_samples: SampleCallback,
    ) -> LiveResult<Box<dyn InputStream>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(LiveError::DeviceUnavailable(
                "microphone permission denied".to_string(),
            ));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock() = Some(on_samples);
        Ok(Box::new(ManualStream {
            sample_rate: requested_rate,
            callback: self.callback.clone(),
            playing: self.playing.clone(),
        }))
    }
}

struct ManualStream {
    sample_rate: u32,
    callback: CallbackSlot,
    playing: Arc<AtomicBool>,
}

impl InputStream for ManualStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self) -> LiveResult<()> {
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
        self.callback.lock().take();
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Output
// =============================================================================

/// Sink that records everything it is asked to play.
pub struct RecordingSink {
    sample_rate: u32,
    clock: ManualClock,
    buffers: Mutex<Vec<PlaybackBuffer>>,
    flushes: AtomicU64,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn buffers(&self) -> Vec<PlaybackBuffer> {
        self.buffers.lock().clone()
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for RecordingSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clock(&self) -> Arc<dyn AudioClock> {
        Arc::new(self.clock.clone())
    }

    fn enqueue(&self, buffer: PlaybackBuffer) {
        if !self.is_closed() {
            self.buffers.lock().push(buffer);
        }
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn pending(&self) -> usize {
        let now = self.clock.now();
        self.buffers
            .lock()
            .iter()
            .filter(|b| b.end_time() > now)
            .count()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Speaker on a manual clock. Every open creates a fresh sink.
pub struct RecordingOutput {
    sample_rate: u32,
    pub clock: ManualClock,
    deny: AtomicBool,
    latest: Mutex<Option<Arc<RecordingSink>>>,
}

impl RecordingOutput {
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            sample_rate,
            clock: ManualClock::new(0.0),
            deny: AtomicBool::new(false),
            latest: Mutex::new(None),
        })
    }

    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Sink handed out by the most recent open.
    pub fn sink(&self) -> Option<Arc<RecordingSink>> {
        self.latest.lock().clone()
    }
}

impl AudioOutputDevice for RecordingOutput {
    fn name(&self) -> String {
        "recording output".to_string()
    }

    fn open(&self) -> LiveResult<Arc<dyn PlaybackSink>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(LiveError::DeviceUnavailable(
                "no output device".to_string(),
            ));
        }
        let sink = Arc::new(RecordingSink {
            sample_rate: self.sample_rate,
            clock: self.clock.clone(),
            buffers: Mutex::new(Vec::new()),
            flushes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        *self.latest.lock() = Some(sink.clone());
        Ok(sink)
    }
}

// =============================================================================
// Transport
// =============================================================================

/// How a [`ScriptedTransport`] answers `open`.
#[derive(Debug, Clone, PartialEq)]
pub enum Handshake {
    /// Acknowledge immediately
    Ack,
    /// Connect, then report an error instead of acknowledging
    Reject(String),
    /// Connect and never acknowledge
    Hang,
    /// Fail to connect at all
    Unreachable,
}

/// Shared view of what a [`ScriptedTransport`] saw and did.
pub struct TransportRemote {
    handshake: Mutex<Handshake>,
    opens: AtomicU64,
    closes: AtomicU64,
    close_delay: Mutex<Duration>,
    audio: Mutex<Vec<Bytes>>,
    video: Mutex<Vec<Bytes>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl TransportRemote {
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn audio(&self) -> Vec<Bytes> {
        self.audio.lock().clone()
    }

    pub fn video(&self) -> Vec<Bytes> {
        self.video.lock().clone()
    }

    pub fn set_handshake(&self, handshake: Handshake) {
        *self.handshake.lock() = handshake;
    }

    /// Make every `close` take this long, as a slow socket shutdown would.
    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock() = delay;
    }

    /// Inject an event as if it came from the remote side.
    pub async fn emit(&self, event: TransportEvent) {
        let sender = self.events.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Wait until `count` audio frames have been delivered.
    pub async fn wait_for_audio(&self, count: usize) -> bool {
        wait_until(|| self.audio.lock().len() >= count).await
    }

    /// Wait until `count` video frames have been delivered.
    pub async fn wait_for_video(&self, count: usize) -> bool {
        wait_until(|| self.video.lock().len() >= count).await
    }
}

/// In-process transport driven by the test through a [`TransportRemote`].
pub struct ScriptedTransport {
    remote: Arc<TransportRemote>,
    pump: Option<tokio::task::JoinHandle<()>>,
}

impl ScriptedTransport {
    pub fn new(handshake: Handshake) -> (Self, Arc<TransportRemote>) {
        let remote = Arc::new(TransportRemote {
            handshake: Mutex::new(handshake),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            close_delay: Mutex::new(Duration::ZERO),
            audio: Mutex::new(Vec::new()),
            video: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        });
        (
            Self {
                remote: remote.clone(),
                pump: None,
            },
            remote,
        )
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open(&mut self) -> LiveResult<TransportChannel> {
        let handshake = self.remote.handshake.lock().clone();
        if handshake == Handshake::Unreachable {
            return Err(LiveError::Transport("connection refused".to_string()));
        }
        self.remote.opens.fetch_add(1, Ordering::SeqCst);

        let (sender, mut receiver) = media_channel(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        match handshake {
            Handshake::Ack => {
                let _ = events_tx.send(TransportEvent::Opened).await;
            }
            Handshake::Reject(message) => {
                let _ = events_tx.send(TransportEvent::Error(message)).await;
            }
            Handshake::Hang | Handshake::Unreachable => {}
        }
        *self.remote.events.lock() = Some(events_tx);

        let remote = self.remote.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(media) = receiver.recv().await {
                match media {
                    OutboundMedia::Audio(pcm) => remote.audio.lock().push(pcm),
                    OutboundMedia::Video(jpeg) => remote.video.lock().push(jpeg),
                }
            }
        }));

        Ok(TransportChannel {
            sender,
            events: events_rx,
        })
    }

    async fn close(&mut self) -> LiveResult<()> {
        let delay = *self.remote.close_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
            self.remote.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.remote.events.lock().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.pump.is_some()
    }
}

// =============================================================================
// Mock Gemini Live server
// =============================================================================

/// Something the mock server should do next.
#[derive(Debug, Clone)]
pub enum ServerAction {
    Send(Value),
    Close,
}

/// Mock Gemini Live endpoint accepting a single connection.
pub struct MockGeminiServer {
    pub endpoint: String,
    pub received: mpsc::UnboundedReceiver<Value>,
    actions: mpsc::UnboundedSender<ServerAction>,
}

impl MockGeminiServer {
    /// Bind a local listener. The server acknowledges setup with
    /// `setupComplete` and then follows the actions it is given.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (actions_tx, mut actions_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(stream).await else {
                return;
            };
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    msg = read.next() => {
                        let Some(Ok(msg)) = msg else { break };
                        let Message::Text(text) = msg else { continue };
                        let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                        let is_setup = value.get("setup").is_some();
                        let _ = received_tx.send(value);
                        if is_setup {
                            let ack = json!({"setupComplete": {}}).to_string();
                            if write.send(Message::Text(ack.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    action = actions_rx.recv() => match action {
                        Some(ServerAction::Send(value)) => {
                            if write.send(Message::Text(value.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(ServerAction::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        });

        Self {
            endpoint: format!("ws://{}", addr),
            received: received_rx,
            actions: actions_tx,
        }
    }

    pub fn send(&self, value: Value) {
        let _ = self.actions.send(ServerAction::Send(value));
    }

    pub fn close(&self) {
        let _ = self.actions.send(ServerAction::Close);
    }

    /// Next client message that is not the setup.
    pub async fn next_media(&mut self) -> Option<Value> {
        loop {
            let value = tokio::time::timeout(Duration::from_secs(5), self.received.recv())
                .await
                .ok()??;
            if value.get("realtimeInput").is_some() {
                return Some(value);
            }
        }
    }
}

/// Server message carrying one chunk of model audio.
pub fn audio_message(samples: &[f32], rate: u32) -> Value {
    json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": format!("audio/pcm;rate={}", rate),
                        "data": bytes_to_transport_text(&float_to_pcm16(samples)),
                    }
                }]
            }
        }
    })
}

// =============================================================================
// Helpers
// =============================================================================

/// Chunk of `seconds` of silence at `rate`, encoded for the transport.
pub fn silent_chunk(seq: u64, seconds: f64, rate: u32) -> AudioChunk {
    let samples = vec![0.0f32; (seconds * rate as f64).round() as usize];
    AudioChunk {
        seq,
        mime_type: Some(format!("audio/pcm;rate={}", rate)),
        data: bytes_to_transport_text(&float_to_pcm16(&samples)),
    }
}

/// Poll `condition` for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
