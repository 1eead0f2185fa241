use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use waav_live::core::audio::{AudioInputDevice, AudioOutputDevice, NullAudioInput, NullAudioOutput};
use waav_live::{LiveConfig, LiveSession, SessionDevices, SessionState, VisualMode, create_transport};

#[cfg(feature = "backend-cpal")]
use waav_live::core::audio::{CpalAudioInput, CpalAudioOutput};

/// WaaV Live - Real-time audio/video conversation client
#[derive(Parser, Debug)]
#[command(name = "waav-live")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use a silent microphone and discard agent audio instead of real devices
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Initial visual mode (none, camera, screen)
    #[arg(short = 'm', long = "mode", value_parser = parse_mode)]
    mode: Option<VisualMode>,

    /// Image file rendered as the camera feed
    #[arg(long = "camera-image", value_name = "PATH")]
    camera_image: Option<PathBuf>,

    /// Image file rendered as the shared screen
    #[arg(long = "screen-image", value_name = "PATH")]
    screen_image: Option<PathBuf>,
}

fn parse_mode(s: &str) -> Result<VisualMode, String> {
    VisualMode::parse(s).ok_or_else(|| format!("unknown visual mode '{s}'"))
}

type AudioDevices = (Arc<dyn AudioInputDevice>, Arc<dyn AudioOutputDevice>);

#[cfg(feature = "backend-cpal")]
fn hardware_devices() -> Option<AudioDevices> {
    Some((Arc::new(CpalAudioInput), Arc::new(CpalAudioOutput)))
}

#[cfg(not(feature = "backend-cpal"))]
fn hardware_devices() -> Option<AudioDevices> {
    tracing::warn!("Built without the backend-cpal feature, using null audio devices");
    None
}

fn null_devices(playback_rate: u32) -> AudioDevices {
    (
        Arc::new(NullAudioInput),
        Arc::new(NullAudioOutput::new(playback_rate)),
    )
}

/// Apply one stdin command. Returns false when the user asked to quit.
fn handle_command(session: &LiveSession, command: &str) -> bool {
    match command {
        "" => true,
        "quit" | "exit" | "q" => false,
        "stats" => {
            match serde_json::to_string(&session.stats()) {
                Ok(stats) => println!("{stats}"),
                Err(e) => tracing::warn!("Failed to serialize stats: {}", e),
            }
            true
        }
        other => {
            match VisualMode::parse(other) {
                Some(mode) => {
                    if let Err(e) = session.set_visual_mode(mode) {
                        tracing::warn!("Failed to switch to {}: {}", mode, e);
                    }
                }
                None => println!("Unknown command '{other}'. Commands: camera, screen, none, stats, quit"),
            }
            true
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = if let Some(config_path) = cli.config.as_ref() {
        println!("Loading configuration from {}", config_path.display());
        LiveConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        LiveConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };
    if let Some(mode) = cli.mode {
        config.initial_mode = mode;
    }
    if let Some(path) = cli.camera_image {
        config.camera_image = Some(path);
    }
    if let Some(path) = cli.screen_image {
        config.screen_image = Some(path);
    }

    let transport = create_transport(&config.provider, config.transport_config()?)
        .context("Failed to create transport")?;

    let (audio_input, audio_output) = if cli.dry_run {
        None
    } else {
        hardware_devices()
    }
    .unwrap_or_else(|| null_devices(config.playback_sample_rate));
    info!(
        input = %audio_input.name(),
        output = %audio_output.name(),
        "Using audio devices"
    );

    let devices = SessionDevices::new(audio_input, audio_output)
        .with_video(Arc::new(config.image_source_provider()));
    let session = LiveSession::new(transport, devices, config.session_options())?;

    session.on_agent_audio_activity(|speaking| info!(speaking, "Agent audio activity"));
    session.on_error(|e| {
        if e.is_fatal() {
            tracing::error!("Session error: {}", e);
        } else {
            tracing::warn!("Session error: {}", e);
        }
    });

    info!(session_id = session.id(), provider = %config.provider, "Starting live session");
    session.connect().await.context("Failed to connect session")?;
    println!("Connected. Commands: camera, screen, none, stats, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state_check = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, disconnecting");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_command(&session, line.trim()) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = state_check.tick() => {
                if session.state() != SessionState::Active {
                    tracing::warn!(state = %session.state(), "Session is no longer active");
                    break;
                }
            }
        }
    }

    session.disconnect().await?;
    info!(stats = ?session.stats(), "Session finished");

    Ok(())
}
