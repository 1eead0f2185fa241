//! Gemini Live Session Integration Tests
//!
//! Runs a full session over a real WebSocket against a mock Gemini Live
//! server on localhost.

mod mock;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mock::{ManualInput, MockGeminiServer, RecordingOutput};
use waav_live::core::audio::{bytes_to_transport_text, float_to_pcm16};
use waav_live::core::video::StaticSourceProvider;
use waav_live::{
    LiveSession, SessionDevices, SessionOptions, SessionState, TransportConfig, VisualMode,
    create_transport,
};

fn session_for(server: &MockGeminiServer) -> (LiveSession, Arc<ManualInput>, Arc<RecordingOutput>) {
    let transport = create_transport(
        "gemini",
        TransportConfig {
            api_key: "test-key".to_string(),
            endpoint: Some(server.endpoint.clone()),
            voice: Some("Kore".to_string()),
            instructions: Some("Be brief.".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    let input = ManualInput::new();
    let output = RecordingOutput::new(24000);
    let devices = SessionDevices::new(input.clone(), output.clone())
        .with_video(Arc::new(StaticSourceProvider::hd()));
    let options = SessionOptions {
        handshake_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let session = LiveSession::new(transport, devices, options).unwrap();
    (session, input, output)
}

#[tokio::test]
async fn test_session_streams_audio_both_ways() {
    let mut server = MockGeminiServer::start().await;
    let (session, input, output) = session_for(&server);

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);

    let setup = server.received.recv().await.unwrap();
    assert_eq!(setup["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
    assert_eq!(
        setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
            ["voiceName"],
        "Kore"
    );

    // Outbound: one captured frame becomes one realtimeInput message.
    input.push(&vec![0.25; 4096]);
    let media = server.next_media().await.unwrap();
    let chunk = &media["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    let expected = bytes_to_transport_text(&float_to_pcm16(&vec![0.25; 4096]));
    assert_eq!(chunk["data"], expected);

    // Inbound: model audio lands on the playback schedule.
    server.send(mock::audio_message(&vec![0.0; 12000], 24000));
    let sink = output.sink().unwrap();
    assert!(mock::wait_until(|| sink.buffers().len() == 1).await);
    assert!((sink.buffers()[0].duration - 0.5).abs() < 1e-9);
    assert!(mock::wait_until(|| session.is_agent_active()).await);

    server.send(json!({"serverContent": {"turnComplete": true}}));
    assert!(mock::wait_until(|| !session.is_agent_active()).await);

    session.disconnect().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_session_sends_jpeg_frames_in_camera_mode() {
    let mut server = MockGeminiServer::start().await;
    let (session, _input, _output) = session_for(&server);
    session.set_visual_mode(VisualMode::Camera).unwrap();

    session.connect().await.unwrap();

    let media = server.next_media().await.unwrap();
    let chunk = &media["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "image/jpeg");
    assert!(!chunk["data"].as_str().unwrap().is_empty());

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_server_close_fails_session() {
    let server = MockGeminiServer::start().await;
    let (session, input, _output) = session_for(&server);

    let errors = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = errors.clone();
    session.on_error(move |e| sink.lock().push(e.clone()));

    session.connect().await.unwrap();
    server.close();

    assert!(mock::wait_until(|| session.state() == SessionState::Error).await);
    assert!(!session.is_capturing());
    assert!(!input.is_playing());
    assert_eq!(errors.lock().len(), 1);
}

#[tokio::test]
async fn test_server_error_message_fails_session() {
    let server = MockGeminiServer::start().await;
    let (session, _input, _output) = session_for(&server);

    session.connect().await.unwrap();
    server.send(json!({"error": {"code": 429, "message": "quota exceeded", "status": "RESOURCE_EXHAUSTED"}}));

    assert!(mock::wait_until(|| session.state() == SessionState::Error).await);
}
