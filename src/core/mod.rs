pub mod audio;
pub mod error;
pub mod session;
pub mod transport;
pub mod video;

// Re-export commonly used types for convenience
pub use audio::{
    AudioChunk, AudioFrame, AudioInputDevice, AudioOutputDevice, CaptureConfig, CapturePipeline,
    NullAudioInput, NullAudioOutput, PlaybackBuffer, PlaybackScheduler, PlaybackSink,
};

pub use error::{LiveError, LiveResult};

pub use session::{LiveSession, SessionDevices, SessionOptions, SessionState, SessionStats};

pub use transport::{
    BoxedTransport, GeminiLiveTransport, Transport, TransportConfig, TransportEvent,
    TransportProvider, create_transport, create_transport_from_enum,
    get_supported_transport_providers,
};

pub use video::{
    ImageFileSourceProvider, ModeProfile, VideoFrame, VideoFramePipeline, VideoProfiles,
    VideoSourceProvider, VisualMode,
};
