//! Base traits and types for the duplex media transport.
//!
//! A transport carries captured audio and video frames to the remote
//! conversational service and surfaces what comes back as a stream of
//! [`TransportEvent`]s. Sending never blocks the caller: capture callbacks
//! run on device threads and timers that must not stall.
//!
//! # Audio Format
//!
//! - Outbound: PCM 16-bit signed little-endian mono at the configured capture rate
//! - Inbound: base64 PCM 16-bit chunks, rate from the chunk MIME type or the
//!   configured playback rate

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::core::audio::{AudioChunk, DEFAULT_CAPTURE_SAMPLE_RATE};
use crate::core::error::{LiveError, LiveResult};

/// Default capacity of the outbound audio queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Default capacity of the inbound event queue.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration handed to a transport at construction.
#[derive(Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// API key for authentication
    pub api_key: String,

    /// Override of the provider's WebSocket endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model identifier
    #[serde(default)]
    pub model: Option<String>,

    /// Voice used for spoken responses
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Rate of outbound PCM audio
    pub input_sample_rate: u32,

    /// Capacity of the outbound audio queue
    pub outbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: None,
            model: None,
            voice: None,
            instructions: None,
            input_sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "[REDACTED]" })
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("instructions", &self.instructions.as_ref().map(|_| "..."))
            .field("input_sample_rate", &self.input_sample_rate)
            .field("outbound_capacity", &self.outbound_capacity)
            .finish()
    }
}

// =============================================================================
// Events
// =============================================================================

/// Something the remote side did.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake finished, media may flow
    Opened,
    /// One chunk of synthesized speech
    AudioChunk(AudioChunk),
    /// The agent finished its turn
    TurnComplete,
    /// The agent was cut off; queued speech is stale
    Interrupted,
    /// The remote side reported an error
    Error(String),
    /// The channel closed
    Closed { reason: Option<String> },
}

impl TransportEvent {
    /// Whether this event ends the channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Closed { .. })
    }
}

// =============================================================================
// Outbound media
// =============================================================================

/// Media payload waiting to be written to the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMedia {
    /// PCM 16-bit little-endian mono
    Audio(Bytes),
    /// JPEG still image
    Video(Bytes),
}

/// Non-blocking handle for queuing outbound media.
///
/// Audio has a bounded queue. Video holds at most one frame in flight: a
/// newer frame is refused while an older one is still queued, which keeps
/// video fresh instead of complete.
#[derive(Debug, Clone)]
pub struct MediaSender {
    audio: mpsc::Sender<Bytes>,
    video: mpsc::Sender<Bytes>,
}

/// Receiving side of a [`MediaSender`], owned by the transport.
#[derive(Debug)]
pub struct MediaReceiver {
    audio: mpsc::Receiver<Bytes>,
    video: mpsc::Receiver<Bytes>,
}

/// Create a linked media sender and receiver.
pub fn media_channel(audio_capacity: usize) -> (MediaSender, MediaReceiver) {
    let (audio_tx, audio_rx) = mpsc::channel(audio_capacity.max(1));
    let (video_tx, video_rx) = mpsc::channel(1);
    (
        MediaSender {
            audio: audio_tx,
            video: video_tx,
        },
        MediaReceiver {
            audio: audio_rx,
            video: video_rx,
        },
    )
}

fn try_queue(tx: &mpsc::Sender<Bytes>, data: Bytes) -> LiveResult<bool> {
    match tx.try_send(data) {
        Ok(()) => Ok(true),
        Err(TrySendError::Full(_)) => Ok(false),
        Err(TrySendError::Closed(_)) => Err(LiveError::NotConnected),
    }
}

impl MediaSender {
    /// Queue a PCM frame. `Ok(false)` means the queue was full and the frame
    /// was dropped.
    pub fn try_send_audio(&self, pcm: Bytes) -> LiveResult<bool> {
        try_queue(&self.audio, pcm)
    }

    /// Queue a JPEG frame. `Ok(false)` means a previous frame is still
    /// pending and this one was skipped.
    pub fn try_send_video(&self, jpeg: Bytes) -> LiveResult<bool> {
        try_queue(&self.video, jpeg)
    }

    /// Whether the transport side has gone away.
    pub fn is_closed(&self) -> bool {
        self.audio.is_closed()
    }
}

impl MediaReceiver {
    /// Next outbound payload, audio first. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<OutboundMedia> {
        tokio::select! {
            biased;
            Some(pcm) = self.audio.recv() => Some(OutboundMedia::Audio(pcm)),
            Some(jpeg) = self.video.recv() => Some(OutboundMedia::Video(jpeg)),
            else => None,
        }
    }

    /// Stop accepting new media.
    pub fn close(&mut self) {
        self.audio.close();
        self.video.close();
    }
}

/// An open duplex channel.
#[derive(Debug)]
pub struct TransportChannel {
    pub sender: MediaSender,
    pub events: mpsc::Receiver<TransportEvent>,
}

// =============================================================================
// Transport trait
// =============================================================================

/// Duplex connection to a remote conversational service.
///
/// A transport opens at most one channel at a time. It never reconnects on
/// its own: a dropped connection is reported as a terminal event and the
/// owner decides what to do.
#[async_trait]
pub trait Transport: Send {
    /// Provider name, e.g. `"gemini"`.
    fn name(&self) -> &'static str;

    /// Connect and send the session setup.
    ///
    /// Returns once the connection is established. [`TransportEvent::Opened`]
    /// follows on the event stream when the remote side acknowledges setup.
    async fn open(&mut self) -> LiveResult<TransportChannel>;

    /// Close the channel. Safe to call when already closed.
    async fn close(&mut self) -> LiveResult<()>;

    /// Whether a channel is currently open.
    fn is_open(&self) -> bool;
}

/// Boxed transport for dynamic dispatch.
pub type BoxedTransport = Box<dyn Transport>;
