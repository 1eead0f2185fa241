//! Gemini Live transport implementation.
//!
//! One WebSocket connection per [`Transport::open`]. A spawned connection
//! task owns both halves of the socket, writes queued media as
//! `realtimeInput` messages and translates server messages into
//! [`TransportEvent`]s. The connection is never re-established
//! automatically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::{
    GEMINI_DEFAULT_MODEL, GEMINI_LIVE_URL, GeminiVoice, normalize_model, pcm_mime_type,
};
use super::messages::{ClientMessage, ServerMessage, Setup};
use crate::core::error::{LiveError, LiveResult};
use crate::core::transport::base::{
    EVENT_CHANNEL_CAPACITY, MediaReceiver, OutboundMedia, Transport, TransportChannel,
    TransportConfig, TransportEvent, media_channel,
};
use crate::core::video::JPEG_MIME_TYPE;

/// Time allowed for the connection task to finish after a close request.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Gemini Live API transport.
pub struct GeminiLiveTransport {
    config: TransportConfig,
    model: String,
    voice: GeminiVoice,
    connected: Arc<AtomicBool>,
    shutdown: Option<CancellationToken>,
    connection_handle: Option<JoinHandle<()>>,
}

impl GeminiLiveTransport {
    /// Create a new transport. Fails when the API key is missing.
    pub fn new(config: TransportConfig) -> LiveResult<Self> {
        if config.api_key.is_empty() {
            return Err(LiveError::InvalidConfiguration(
                "API key is required for Gemini Live".to_string(),
            ));
        }
        if config.input_sample_rate == 0 {
            return Err(LiveError::InvalidConfiguration(
                "input sample rate must be positive".to_string(),
            ));
        }

        let model = normalize_model(config.model.as_deref().unwrap_or(GEMINI_DEFAULT_MODEL));
        let voice = match config.voice.as_deref() {
            Some(name) => GeminiVoice::parse(name).ok_or_else(|| {
                let known: Vec<&str> = GeminiVoice::all().iter().map(|v| v.as_str()).collect();
                LiveError::InvalidConfiguration(format!(
                    "unknown Gemini voice '{}' (expected one of: {})",
                    name,
                    known.join(", ")
                ))
            })?,
            None => GeminiVoice::default(),
        };

        Ok(Self {
            config,
            model,
            voice,
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            connection_handle: None,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn voice(&self) -> GeminiVoice {
        self.voice
    }

    fn build_ws_url(&self) -> LiveResult<Url> {
        let endpoint = self.config.endpoint.as_deref().unwrap_or(GEMINI_LIVE_URL);
        Url::parse_with_params(endpoint, &[("key", self.config.api_key.as_str())])
            .map_err(|e| LiveError::InvalidConfiguration(format!("invalid endpoint: {}", e)))
    }

    fn setup_message(&self) -> ClientMessage {
        ClientMessage::Setup(Setup::audio(
            &self.model,
            self.voice,
            self.config.instructions.as_deref(),
        ))
    }
}

/// Forward translated server messages. Returns `false` once the receiver is gone.
async fn forward_payload(
    payload: &str,
    events_tx: &mpsc::Sender<TransportEvent>,
    next_seq: &mut u64,
) -> bool {
    let message = match serde_json::from_str::<ServerMessage>(payload) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Failed to parse server message: {}", e);
            return true;
        }
    };
    for event in message.into_events(next_seq) {
        if events_tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

#[async_trait]
impl Transport for GeminiLiveTransport {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn open(&mut self) -> LiveResult<TransportChannel> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(LiveError::InvalidState(
                "transport is already open".to_string(),
            ));
        }

        let url = self.build_ws_url()?;
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| LiveError::Transport(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| LiveError::Transport(format!("connection failed: {}", e)))?;

        tracing::info!(model = %self.model, voice = %self.voice, "Connected to Gemini Live");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        // Setup must precede any media
        let setup = serde_json::to_string(&self.setup_message())?;
        ws_sink
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| LiveError::Transport(format!("failed to send setup: {}", e)))?;

        let (sender, mut media_rx): (_, MediaReceiver) =
            media_channel(self.config.outbound_capacity);
        let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(EVENT_CHANNEL_CAPACITY);

        let shutdown = CancellationToken::new();
        let cancel = shutdown.clone();
        let connected = self.connected.clone();
        let audio_mime = pcm_mime_type(self.config.input_sample_rate);

        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let mut next_seq = 0u64;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }

                    media = media_rx.recv() => {
                        let message = match media {
                            Some(OutboundMedia::Audio(pcm)) => ClientMessage::media(audio_mime.as_str(), &pcm),
                            Some(OutboundMedia::Video(jpeg)) => ClientMessage::media(JPEG_MIME_TYPE, &jpeg),
                            None => {
                                tracing::debug!("All media senders dropped, closing");
                                let _ = ws_sink.send(Message::Close(None)).await;
                                break;
                            }
                        };

                        let json = match serde_json::to_string(&message) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize media: {}", e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            let _ = events_tx.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }

                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if !forward_payload(text.as_str(), &events_tx, &mut next_seq).await {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(data))) => {
                                match std::str::from_utf8(&data) {
                                    Ok(text) => {
                                        if !forward_payload(text, &events_tx, &mut next_seq).await {
                                            break;
                                        }
                                    }
                                    Err(_) => tracing::warn!("Ignoring non-UTF-8 binary frame"),
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let reason = frame
                                    .map(|f| f.reason.as_str().to_string())
                                    .filter(|r| !r.is_empty());
                                tracing::info!(reason = ?reason, "WebSocket closed by server");
                                let _ = events_tx.send(TransportEvent::Closed { reason }).await;
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                let _ = events_tx.send(TransportEvent::Error(e.to_string())).await;
                                break;
                            }
                            None => {
                                let _ = events_tx.send(TransportEvent::Closed { reason: None }).await;
                                break;
                            }
                        }
                    }
                }
            }

            media_rx.close();
            connected.store(false, Ordering::SeqCst);
            tracing::debug!("Gemini Live connection task exited");
        });

        self.shutdown = Some(shutdown);
        self.connection_handle = Some(handle);

        Ok(TransportChannel {
            sender,
            events: events_rx,
        })
    }

    async fn close(&mut self) -> LiveResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        if let Some(mut handle) = self.connection_handle.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                tracing::warn!("Connection task did not exit in time, aborting");
                handle.abort();
            }
            tracing::info!("Disconnected from Gemini Live");
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for GeminiLiveTransport {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn config(endpoint: Option<String>) -> TransportConfig {
        TransportConfig {
            api_key: "test_key".to_string(),
            endpoint,
            ..Default::default()
        }
    }

    /// Accept one connection, check setup, reply with `replies`, then echo
    /// every received client message on `seen`.
    async fn mock_server(replies: Vec<Value>) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();

            while let Some(Ok(msg)) = read.next().await {
                let Message::Text(text) = msg else { continue };
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                let is_setup = value.get("setup").is_some();
                let _ = seen_tx.send(value);
                if is_setup {
                    for reply in &replies {
                        write
                            .send(Message::Text(reply.to_string().into()))
                            .await
                            .unwrap();
                    }
                }
            }
        });

        (format!("ws://{}", addr), seen_rx)
    }

    #[test]
    fn test_api_key_required() {
        let result = GeminiLiveTransport::new(TransportConfig::default());
        assert!(matches!(result, Err(LiveError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_unknown_voice_rejected() {
        let mut cfg = config(None);
        cfg.voice = Some("alloy".to_string());
        match GeminiLiveTransport::new(cfg) {
            Err(LiveError::InvalidConfiguration(message)) => {
                assert!(message.contains("'alloy'"));
                assert!(message.contains("Puck"));
                assert!(message.contains("Zephyr"));
            }
            _ => panic!("expected an invalid configuration error"),
        }
    }

    #[test]
    fn test_build_ws_url() {
        let transport = GeminiLiveTransport::new(config(None)).unwrap();
        let url = transport.build_ws_url().unwrap();
        assert!(url.as_str().starts_with(GEMINI_LIVE_URL));
        assert!(url.as_str().ends_with("?key=test_key"));
        assert_eq!(transport.model(), GEMINI_DEFAULT_MODEL);
        assert_eq!(transport.voice(), GeminiVoice::Puck);
    }

    #[tokio::test]
    async fn test_open_failure_is_transport_error() {
        let mut transport =
            GeminiLiveTransport::new(config(Some("ws://127.0.0.1:1".to_string()))).unwrap();
        let result = transport.open().await;
        assert!(matches!(result, Err(LiveError::Transport(_))));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_session_roundtrip_with_mock_server() {
        let (endpoint, mut seen) = mock_server(vec![
            json!({"setupComplete": {}}),
            json!({"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAABAA=="}}
            ]}}}),
            json!({"serverContent": {"turnComplete": true}}),
        ])
        .await;

        let mut transport = GeminiLiveTransport::new(config(Some(endpoint))).unwrap();
        let mut channel = transport.open().await.unwrap();
        assert!(transport.is_open());

        let setup = seen.recv().await.unwrap();
        assert_eq!(setup["setup"]["model"], GEMINI_DEFAULT_MODEL);

        assert_eq!(channel.events.recv().await, Some(TransportEvent::Opened));
        match channel.events.recv().await {
            Some(TransportEvent::AudioChunk(chunk)) => {
                assert_eq!(chunk.seq, 0);
                assert_eq!(chunk.advertised_rate(), Some(24000));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            channel.events.recv().await,
            Some(TransportEvent::TurnComplete)
        );

        assert!(channel
            .sender
            .try_send_audio(Bytes::from_static(&[0x01, 0x02]))
            .unwrap());
        let media = seen.recv().await.unwrap();
        let chunk = &media["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AQI=");

        assert!(channel
            .sender
            .try_send_video(Bytes::from_static(&[0xFF, 0xD8]))
            .unwrap());
        let media = seen.recv().await.unwrap();
        assert_eq!(
            media["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "image/jpeg"
        );

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_server_close_emits_closed_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        });

        let mut transport =
            GeminiLiveTransport::new(config(Some(format!("ws://{}", addr)))).unwrap();
        let mut channel = transport.open().await.unwrap();

        let event = channel.events.recv().await.unwrap();
        assert!(event.is_terminal());
        transport.close().await.unwrap();
    }
}
