//! Periodic frame capture.
//!
//! A single timer task drives the pipeline. On each tick it takes the current
//! source and visual mode together, asks the source for a frame, and renders
//! plus compresses it on the blocking pool so the timer never stalls the
//! runtime. Ticks that fall behind are skipped, never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::encoder::{VideoFrame, compress_frame};
use super::mode::{VideoProfiles, VisualMode};
use super::source::VideoSource;
use crate::core::error::{LiveError, LiveResult};

/// Default capture rate in frames per second.
pub const DEFAULT_VIDEO_FPS: f32 = 1.0;

/// Callback receiving encoded frames.
pub type VideoFrameCallback = Box<dyn FnMut(VideoFrame) + Send + 'static>;

/// The source and the mode it is rendered with. Swapped as one unit.
struct Feed {
    source: Box<dyn VideoSource>,
    mode: VisualMode,
}

type FeedSlot = Arc<Mutex<Feed>>;
type CallbackSlot = Arc<Mutex<Option<VideoFrameCallback>>>;

/// Video pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoPipelineConfig {
    /// Capture rate, frames per second
    pub fps: f32,
    pub profiles: VideoProfiles,
}

impl Default for VideoPipelineConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_VIDEO_FPS,
            profiles: VideoProfiles::default(),
        }
    }
}

impl VideoPipelineConfig {
    pub fn validate(&self) -> LiveResult<()> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(LiveError::InvalidConfiguration(format!(
                "video fps must be positive, got {}",
                self.fps
            )));
        }
        self.profiles.validate()
    }

    /// Interval between ticks.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }
}

/// Counters for a running pipeline.
#[derive(Debug, Default)]
struct VideoCounters {
    delivered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStats {
    /// Frames handed to the callback
    pub frames_delivered: u64,
    /// Ticks without a frame (no source frame, or mode is none)
    pub ticks_skipped: u64,
    /// Ticks whose render or encode failed
    pub frames_failed: u64,
}

/// Outcome of one tick.
enum Tick {
    Frame(VideoFrame),
    Idle,
}

fn capture_tick(feed: &FeedSlot, profiles: VideoProfiles, seq: u64) -> LiveResult<Tick> {
    let (image, mode, profile) = {
        let mut feed = feed.lock();
        let Some(profile) = profiles.for_mode(feed.mode) else {
            return Ok(Tick::Idle);
        };
        if !feed.source.has_frame() {
            return Ok(Tick::Idle);
        }
        (feed.source.render()?, feed.mode, profile)
    };
    Ok(Tick::Frame(compress_frame(&image, mode, profile, seq)?))
}

/// Entry point for starting the periodic capture.
pub struct VideoFramePipeline;

impl VideoFramePipeline {
    /// Start capturing from `source` in `mode`.
    ///
    /// Fails outside a Tokio runtime. The first tick fires immediately.
    pub fn start<F>(
        source: Box<dyn VideoSource>,
        mode: VisualMode,
        config: VideoPipelineConfig,
        on_frame: F,
    ) -> LiveResult<VideoHandle>
    where
        F: FnMut(VideoFrame) + Send + 'static,
    {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LiveError::Internal("video pipeline requires a Tokio runtime".to_string())
        })?;

        let source_name = source.name();
        let feed: FeedSlot = Arc::new(Mutex::new(Feed { source, mode }));
        let on_frame: VideoFrameCallback = Box::new(on_frame);
        let callback: CallbackSlot = Arc::new(Mutex::new(Some(on_frame)));
        let counters = Arc::new(VideoCounters::default());
        let cancel = CancellationToken::new();

        let task = runtime.spawn(run_timer(
            feed.clone(),
            callback.clone(),
            counters.clone(),
            cancel.clone(),
            config,
        ));

        tracing::info!(
            source = %source_name,
            mode = %mode,
            fps = config.fps,
            "Video pipeline started"
        );

        Ok(VideoHandle {
            feed,
            callback,
            counters,
            cancel,
            task: Some(task),
        })
    }
}

async fn run_timer(
    feed: FeedSlot,
    callback: CallbackSlot,
    counters: Arc<VideoCounters>,
    cancel: CancellationToken,
    config: VideoPipelineConfig,
) {
    let mut interval = tokio::time::interval(config.period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seq = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let tick_feed = feed.clone();
        let profiles = config.profiles;
        let frame_seq = seq;
        let result =
            tokio::task::spawn_blocking(move || capture_tick(&tick_feed, profiles, frame_seq))
                .await;

        match result {
            Ok(Ok(Tick::Frame(frame))) => {
                let mut slot = callback.lock();
                // Stopped while encoding
                let Some(on_frame) = slot.as_mut() else {
                    break;
                };
                seq += 1;
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                on_frame(frame);
            }
            Ok(Ok(Tick::Idle)) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Video frame capture failed: {}", e);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Video capture task panicked: {}", e);
            }
        }
    }

    tracing::debug!("Video timer exited");
}

/// Handle to a running video pipeline.
///
/// After [`stop`](Self::stop) returns the callback is never invoked again,
/// even if an encode was in flight.
pub struct VideoHandle {
    feed: FeedSlot,
    callback: CallbackSlot,
    counters: Arc<VideoCounters>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl VideoHandle {
    /// Mode used for the next tick.
    pub fn mode(&self) -> VisualMode {
        self.feed.lock().mode
    }

    /// Switch modes without restarting the timer. Returns the previous mode.
    pub fn set_mode(&self, mode: VisualMode) -> VisualMode {
        let previous = std::mem::replace(&mut self.feed.lock().mode, mode);
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "Visual mode changed");
        }
        previous
    }

    /// Swap source and mode together. No tick renders one with the other's
    /// predecessor. Returns the previous mode.
    pub fn switch(&self, source: Box<dyn VideoSource>, mode: VisualMode) -> VisualMode {
        let name = source.name();
        let previous = {
            let mut feed = self.feed.lock();
            feed.source = source;
            std::mem::replace(&mut feed.mode, mode)
        };
        tracing::info!(source = %name, from = %previous, to = %mode, "Video source switched");
        previous
    }

    pub fn stats(&self) -> VideoStats {
        VideoStats {
            frames_delivered: self.counters.delivered.load(Ordering::Relaxed),
            ticks_skipped: self.counters.skipped.load(Ordering::Relaxed),
            frames_failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_none()
    }

    /// Stop the timer. Returns `false` if it was already stopped.
    pub fn stop(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        self.cancel.cancel();
        self.callback.lock().take();
        task.abort();
        tracing::info!("Video pipeline stopped");
        true
    }
}

impl Drop for VideoHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::source::StaticFrameSource;

    fn collector() -> (
        Arc<Mutex<Vec<VideoFrame>>>,
        impl FnMut(VideoFrame) + Send + 'static,
    ) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        (frames, move |frame| sink.lock().push(frame))
    }

    fn fast() -> VideoPipelineConfig {
        VideoPipelineConfig {
            fps: 50.0,
            profiles: VideoProfiles::default(),
        }
    }

    async fn wait_for_frames(frames: &Arc<Mutex<Vec<VideoFrame>>>, count: usize) {
        for _ in 0..200 {
            if frames.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} frames", count);
    }

    #[test]
    fn test_capture_tick_skips_none_mode_and_paused_source() {
        let source = StaticFrameSource::solid("cam", 64, 64, [0, 0, 0]);
        let slot: FeedSlot = Arc::new(Mutex::new(Feed {
            source: Box::new(source.clone()),
            mode: VisualMode::None,
        }));
        let profiles = VideoProfiles::default();

        assert!(matches!(capture_tick(&slot, profiles, 0), Ok(Tick::Idle)));

        slot.lock().mode = VisualMode::Camera;
        source.set_paused(true);
        assert!(matches!(capture_tick(&slot, profiles, 0), Ok(Tick::Idle)));

        source.set_paused(false);
        match capture_tick(&slot, profiles, 3) {
            Ok(Tick::Frame(frame)) => {
                assert_eq!((frame.width, frame.height), (16, 16));
                assert_eq!(frame.seq, 3);
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(VideoPipelineConfig::default().validate().is_ok());
        let zero = VideoPipelineConfig {
            fps: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(LiveError::InvalidConfiguration(_))
        ));
        assert_eq!(VideoPipelineConfig::default().period(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_pipeline_delivers_frames() {
        let (frames, on_frame) = collector();
        let source = StaticFrameSource::solid("cam", 1280, 720, [10, 20, 30]);
        let mut handle =
            VideoFramePipeline::start(Box::new(source), VisualMode::Camera, fast(), on_frame)
                .unwrap();

        wait_for_frames(&frames, 2).await;
        handle.stop();

        let frames = frames.lock();
        assert!(frames.iter().all(|f| (f.width, f.height) == (320, 180)));
        assert_eq!(frames[0].seq, 0);
        assert_eq!(frames[1].seq, 1);
    }

    #[tokio::test]
    async fn test_mode_change_applies_without_restart() {
        let (frames, on_frame) = collector();
        let provider = crate::core::video::source::StaticSourceProvider::hd();
        let camera = provider.camera.clone().unwrap();
        let mut handle =
            VideoFramePipeline::start(Box::new(camera), VisualMode::Camera, fast(), on_frame)
                .unwrap();
        wait_for_frames(&frames, 1).await;

        assert_eq!(
            handle.switch(Box::new(provider.screen.clone().unwrap()), VisualMode::ScreenShare),
            VisualMode::Camera
        );
        assert_eq!(handle.mode(), VisualMode::ScreenShare);
        let before = frames.lock().len();
        wait_for_frames(&frames, before + 2).await;
        handle.stop();

        let frames = frames.lock();
        let last = frames.last().unwrap();
        assert_eq!(last.mode, VisualMode::ScreenShare);
        assert_eq!((last.width, last.height), (960, 540));
        assert!(frames.windows(2).all(|w| w[1].seq == w[0].seq + 1));
    }

    #[tokio::test]
    async fn test_no_frames_after_stop() {
        let (frames, on_frame) = collector();
        let source = StaticFrameSource::solid("cam", 64, 64, [0, 0, 0]);
        let mut handle =
            VideoFramePipeline::start(Box::new(source), VisualMode::Camera, fast(), on_frame)
                .unwrap();
        wait_for_frames(&frames, 1).await;

        assert!(handle.stop());
        assert!(!handle.stop());
        assert!(handle.is_stopped());
        let count = frames.lock().len();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(frames.lock().len(), count);
    }

    #[tokio::test]
    async fn test_paused_source_counts_skips() {
        let (frames, on_frame) = collector();
        let source = StaticFrameSource::solid("cam", 64, 64, [0, 0, 0]);
        source.set_paused(true);
        let mut handle = VideoFramePipeline::start(
            Box::new(source.clone()),
            VisualMode::Camera,
            fast(),
            on_frame,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = handle.stats();
        handle.stop();

        assert!(frames.lock().is_empty());
        assert!(stats.ticks_skipped > 0);
        assert_eq!(stats.frames_delivered, 0);
    }

    #[tokio::test]
    async fn test_switch_never_mixes_source_and_profile() {
        let (frames, on_frame) = collector();
        let provider = crate::core::video::source::StaticSourceProvider::hd();
        let config = VideoPipelineConfig {
            fps: 200.0,
            profiles: VideoProfiles::default(),
        };
        let mut handle = VideoFramePipeline::start(
            Box::new(provider.camera.clone().unwrap()),
            VisualMode::Camera,
            config,
            on_frame,
        )
        .unwrap();

        for round in 0..10 {
            let (source, mode) = if round % 2 == 0 {
                (provider.screen.clone().unwrap(), VisualMode::ScreenShare)
            } else {
                (provider.camera.clone().unwrap(), VisualMode::Camera)
            };
            handle.switch(Box::new(source), mode);
            tokio::time::sleep(Duration::from_millis(7)).await;
        }
        wait_for_frames(&frames, 3).await;
        handle.stop();

        // Camera is 1280x720 at 0.25, screen is 1920x1080 at 0.5.
        for frame in frames.lock().iter() {
            let expected = match frame.mode {
                VisualMode::Camera => (320, 180),
                VisualMode::ScreenShare => (960, 540),
                VisualMode::None => panic!("frame sent in mode none"),
            };
            assert_eq!((frame.width, frame.height), expected);
        }
    }
}
