//! Playback scheduling with jitter absorption.
//!
//! Inbound chunks arrive with network jitter but in generation order. Each
//! decoded buffer is placed at `max(clock_now, next_available_start_time)`
//! and the cursor advances by the buffer's duration, so buffers play
//! back-to-back when they arrive early and never overlap when they arrive
//! late. There is no buffer pool and no reordering.
//!
//! Chunks at a rate other than the sink's go through one stateful resampler
//! per turn. Its tail is scheduled when the turn completes and discarded
//! when the turn is interrupted.

use std::sync::Arc;

use super::clock::AudioClock;
use super::convert::{pcm16_to_float, transport_text_to_bytes};
use super::device::PlaybackSink;
use super::resample::StreamResampler;
use crate::core::error::{LiveError, LiveResult};

/// An encoded audio payload received from the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Arrival order within the session, starting at 0
    pub seq: u64,
    /// Mime type reported by the service, e.g. `audio/pcm;rate=24000`
    pub mime_type: Option<String>,
    /// PCM16 payload in transport text encoding
    pub data: String,
}

impl AudioChunk {
    /// Sample rate advertised in the mime type, if any.
    pub fn advertised_rate(&self) -> Option<u32> {
        let mime = self.mime_type.as_deref()?;
        mime.split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse::<u32>().ok())
            .filter(|rate| *rate > 0)
    }
}

/// Decoded audio ready to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A buffer with its scheduled position on the audio clock.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Arrival order of the chunk this buffer was decoded from
    pub seq: u64,
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// Scheduled start, in audio-clock seconds
    pub start_time: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl PlaybackBuffer {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Decode a chunk at its own sample rate.
///
/// `fallback_rate` is used when the chunk does not advertise its own rate.
///
/// # Errors
///
/// [`LiveError::MalformedAudio`] for invalid transport text or odd-length PCM.
pub fn decode_chunk(chunk: &AudioChunk, fallback_rate: u32) -> LiveResult<DecodedAudio> {
    let bytes = transport_text_to_bytes(&chunk.data)?;
    let samples = pcm16_to_float(&bytes)?;
    let source_rate = chunk.advertised_rate().unwrap_or(fallback_rate);
    if source_rate == 0 {
        return Err(LiveError::MalformedAudio(format!(
            "chunk {} has no usable sample rate",
            chunk.seq
        )));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: source_rate,
    })
}

/// Counters kept by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub chunks_scheduled: u64,
    pub chunks_dropped: u64,
}

/// Places decoded buffers on the audio clock and hands them to a sink.
///
/// Takes `&mut self` for scheduling, so a single owner serializes all calls.
pub struct PlaybackScheduler {
    clock: Arc<dyn AudioClock>,
    sink: Arc<dyn PlaybackSink>,
    /// Rate assumed for chunks without a rate in their mime type
    chunk_rate: u32,
    next_available_start_time: Option<f64>,
    stats: SchedulerStats,
    /// Converts chunk audio to the sink rate; rebuilt when the chunk rate changes
    resampler: Option<StreamResampler>,
    last_seq: u64,
}

impl PlaybackScheduler {
    /// Create a scheduler driving `sink`, using the sink's clock.
    pub fn new(sink: Arc<dyn PlaybackSink>, chunk_rate: u32) -> Self {
        let clock = sink.clock();
        Self {
            clock,
            sink,
            chunk_rate,
            next_available_start_time: None,
            stats: SchedulerStats::default(),
            resampler: None,
            last_seq: 0,
        }
    }

    /// Start time the next buffer would get if it arrived right now.
    pub fn next_available_start_time(&self) -> Option<f64> {
        self.next_available_start_time
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn sink(&self) -> &Arc<dyn PlaybackSink> {
        &self.sink
    }

    /// Schedule a decoded buffer immediately after the previous one.
    pub fn schedule(&mut self, seq: u64, audio: DecodedAudio) -> PlaybackBuffer {
        let now = self.clock.now();
        let cursor = *self.next_available_start_time.get_or_insert(now);
        let start_time = now.max(cursor);
        let duration = audio.duration();

        self.next_available_start_time = Some(start_time + duration);
        self.stats.chunks_scheduled += 1;

        let buffer = PlaybackBuffer {
            seq,
            samples: Arc::from(audio.samples),
            sample_rate: audio.sample_rate,
            start_time,
            duration,
        };

        tracing::trace!(
            seq,
            start_time,
            duration,
            lead = start_time - now,
            "Scheduled playback buffer"
        );

        if !buffer.samples.is_empty() {
            self.sink.enqueue(buffer.clone());
        }
        buffer
    }

    /// Decode and schedule an inbound chunk.
    ///
    /// A chunk that fails to decode is dropped; the schedule cursor is left
    /// untouched and the error is returned for the caller to signal.
    pub fn schedule_chunk(&mut self, chunk: &AudioChunk) -> LiveResult<PlaybackBuffer> {
        match decode_chunk(chunk, self.chunk_rate).and_then(|audio| self.convert(audio)) {
            Ok(audio) => {
                self.last_seq = chunk.seq;
                Ok(self.schedule(chunk.seq, audio))
            }
            Err(e) => {
                self.stats.chunks_dropped += 1;
                tracing::warn!(seq = chunk.seq, "Dropping undecodable audio chunk: {}", e);
                Err(e)
            }
        }
    }

    /// Bring decoded audio to the sink rate.
    fn convert(&mut self, audio: DecodedAudio) -> LiveResult<DecodedAudio> {
        let output_rate = self.sink.sample_rate();
        if audio.sample_rate == output_rate {
            return Ok(audio);
        }

        let reusable = self
            .resampler
            .as_ref()
            .is_some_and(|r| r.from_rate() == audio.sample_rate && r.to_rate() == output_rate);
        if !reusable {
            self.finish_turn()?;
            self.resampler = Some(StreamResampler::new(audio.sample_rate, output_rate)?);
        }

        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&audio.samples)?,
            None => audio.samples,
        };
        Ok(DecodedAudio {
            samples,
            sample_rate: output_rate,
        })
    }

    /// Schedule the audio the resampler still holds for the current turn.
    ///
    /// Called when the remote service completes a turn. Returns `None` when
    /// nothing was held back.
    pub fn finish_turn(&mut self) -> LiveResult<Option<PlaybackBuffer>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(None);
        };
        let sample_rate = resampler.to_rate();
        let samples = resampler.flush()?;
        if samples.is_empty() {
            return Ok(None);
        }
        let seq = self.last_seq;
        Ok(Some(self.schedule(
            seq,
            DecodedAudio {
                samples,
                sample_rate,
            },
        )))
    }

    /// Discard queued playback and restart the schedule at the clock's current time.
    ///
    /// Used when the remote service reports that its output was interrupted.
    pub fn interrupt(&mut self) {
        self.sink.flush();
        self.next_available_start_time = None;
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        tracing::debug!("Playback schedule reset after interruption");
    }

    /// Whether scheduled audio is still ahead of the clock.
    pub fn is_playing(&self) -> bool {
        self.next_available_start_time
            .is_some_and(|next| next > self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::clock::ManualClock;
    use crate::core::audio::convert::{bytes_to_transport_text, float_to_pcm16};
    use parking_lot::Mutex;

    struct RecordingSink {
        clock: ManualClock,
        rate: u32,
        queued: Mutex<Vec<PlaybackBuffer>>,
        flushes: Mutex<u32>,
    }

    impl RecordingSink {
        fn new(clock: ManualClock, rate: u32) -> Arc<Self> {
            Arc::new(Self {
                clock,
                rate,
                queued: Mutex::new(Vec::new()),
                flushes: Mutex::new(0),
            })
        }
    }

    impl PlaybackSink for RecordingSink {
        fn sample_rate(&self) -> u32 {
            self.rate
        }
        fn clock(&self) -> Arc<dyn AudioClock> {
            Arc::new(self.clock.clone())
        }
        fn enqueue(&self, buffer: PlaybackBuffer) {
            self.queued.lock().push(buffer);
        }
        fn flush(&self) {
            self.queued.lock().clear();
            *self.flushes.lock() += 1;
        }
        fn pending(&self) -> usize {
            self.queued.lock().len()
        }
        fn close(&self) {}
    }

    fn silence(seconds: f64, rate: u32) -> DecodedAudio {
        DecodedAudio {
            samples: vec![0.0; (seconds * rate as f64) as usize],
            sample_rate: rate,
        }
    }

    fn chunk(seq: u64, seconds: f64, rate: u32) -> AudioChunk {
        chunk_of(seq, (seconds * rate as f64) as usize, rate)
    }

    fn chunk_of(seq: u64, len: usize, rate: u32) -> AudioChunk {
        let samples = vec![0.25f32; len];
        AudioChunk {
            seq,
            mime_type: Some(format!("audio/pcm;rate={}", rate)),
            data: bytes_to_transport_text(&float_to_pcm16(&samples)),
        }
    }

    #[test]
    fn test_first_buffer_starts_at_clock_now() {
        let clock = ManualClock::new(3.0);
        let sink = RecordingSink::new(clock.clone(), 24000);
        let mut scheduler = PlaybackScheduler::new(sink.clone(), 24000);

        assert!(scheduler.next_available_start_time().is_none());
        let buffer = scheduler.schedule(0, silence(0.5, 24000));
        assert_eq!(buffer.start_time, 3.0);
        assert_eq!(scheduler.next_available_start_time(), Some(3.5));
        assert_eq!(sink.pending(), 1);
    }

    #[test]
    fn test_gapless_when_arriving_fast() {
        let clock = ManualClock::new(0.0);
        let sink = RecordingSink::new(clock.clone(), 24000);
        let mut scheduler = PlaybackScheduler::new(sink, 24000);

        let durations = [0.5, 0.25, 0.125, 0.75];
        let buffers: Vec<_> = durations
            .iter()
            .enumerate()
            .map(|(i, d)| scheduler.schedule(i as u64, silence(*d, 24000)))
            .collect();

        for pair in buffers.windows(2) {
            assert_eq!(pair[1].start_time, pair[0].start_time + pair[0].duration);
        }
    }

    #[test]
    fn test_gap_when_arriving_late_never_overlap() {
        let clock = ManualClock::new(0.0);
        let sink = RecordingSink::new(clock.clone(), 24000);
        let mut scheduler = PlaybackScheduler::new(sink, 24000);

        let first = scheduler.schedule(0, silence(0.5, 24000));
        clock.set(0.8);
        let second = scheduler.schedule(1, silence(0.5, 24000));

        assert_eq!(first.start_time, 0.0);
        assert_eq!(second.start_time, 0.8);
        assert!(second.start_time >= first.end_time());
    }

    #[test]
    fn test_no_overlap_under_mixed_arrivals() {
        let clock = ManualClock::new(0.0);
        let sink = RecordingSink::new(clock.clone(), 16000);
        let mut scheduler = PlaybackScheduler::new(sink, 16000);

        let arrivals = [0.0, 0.01, 0.02, 1.5, 1.5, 1.51, 4.0];
        let mut previous: Option<PlaybackBuffer> = None;
        for (i, arrival) in arrivals.iter().enumerate() {
            clock.set(*arrival);
            let buffer = scheduler.schedule(i as u64, silence(0.3, 16000));
            assert!(buffer.start_time >= *arrival);
            if let Some(prev) = previous {
                assert!(buffer.start_time >= prev.end_time());
            }
            previous = Some(buffer);
        }
    }

    #[test]
    fn test_decode_failure_leaves_cursor_untouched() {
        let clock = ManualClock::new(0.0);
        let sink = RecordingSink::new(clock.clone(), 24000);
        let mut scheduler = PlaybackScheduler::new(sink.clone(), 24000);

        scheduler.schedule_chunk(&chunk(0, 0.5, 24000)).unwrap();
        let cursor = scheduler.next_available_start_time();

        let bad = AudioChunk {
            seq: 1,
            mime_type: Some("audio/pcm;rate=24000".to_string()),
            data: bytes_to_transport_text(&[1, 2, 3]),
        };
        assert!(matches!(
            scheduler.schedule_chunk(&bad),
            Err(LiveError::MalformedAudio(_))
        ));
        assert_eq!(scheduler.next_available_start_time(), cursor);

        let next = scheduler.schedule_chunk(&chunk(2, 0.5, 24000)).unwrap();
        assert_eq!(Some(next.start_time), cursor);
        assert_eq!(
            scheduler.stats(),
            SchedulerStats {
                chunks_scheduled: 2,
                chunks_dropped: 1
            }
        );
        assert_eq!(sink.pending(), 2);
    }

    #[test]
    fn test_chunk_resampled_to_sink_rate() {
        let clock = ManualClock::new(0.0);
        let sink = RecordingSink::new(clock, 48000);
        let mut scheduler = PlaybackScheduler::new(sink.clone(), 24000);

        let buffer = scheduler.schedule_chunk(&chunk(0, 0.5, 24000)).unwrap();
        assert_eq!(buffer.sample_rate, 48000);
        assert!(buffer.samples.len() <= 24000);

        // The turn's tail completes exactly 0.5 s at the sink rate.
        let tail = scheduler.finish_turn().unwrap().unwrap();
        assert_eq!(tail.start_time, buffer.end_time());
        assert_eq!(buffer.samples.len() + tail.samples.len(), 24000);
        assert!((tail.end_time() - 0.5).abs() < 1e-9);
        assert!(scheduler.finish_turn().unwrap().is_none());
    }

    #[test]
    fn test_resampled_turn_has_exact_length_across_chunks() {
        let clock = ManualClock::new(0.0);
        let sink = RecordingSink::new(clock, 16000);
        let mut scheduler = PlaybackScheduler::new(sink.clone(), 24000);

        // Chunk sizes are not a multiple of the resampler's input block.
        let mut total = 0;
        for seq in 0..7 {
            total += scheduler
                .schedule_chunk(&chunk_of(seq, 2500, 24000))
                .unwrap()
                .samples
                .len();
        }
        if let Some(tail) = scheduler.finish_turn().unwrap() {
            total += tail.samples.len();
        }
        // 17500 samples at 24 kHz
        assert_eq!(total, 11667);

        let queued = sink.queued.lock();
        for pair in queued.windows(2) {
            assert!((pair[1].start_time - pair[0].end_time()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_interrupt_discards_resampler_tail() {
        let clock = ManualClock::new(0.0);
        let sink = RecordingSink::new(clock, 48000);
        let mut scheduler = PlaybackScheduler::new(sink, 24000);

        scheduler.schedule_chunk(&chunk_of(0, 2640, 24000)).unwrap();
        scheduler.interrupt();
        assert!(scheduler.finish_turn().unwrap().is_none());
    }

    #[test]
    fn test_interrupt_flushes_and_restarts_at_now() {
        let clock = ManualClock::new(0.0);
        let sink = RecordingSink::new(clock.clone(), 24000);
        let mut scheduler = PlaybackScheduler::new(sink.clone(), 24000);

        scheduler.schedule(0, silence(2.0, 24000));
        assert!(scheduler.is_playing());
        clock.set(0.5);
        scheduler.interrupt();
        assert_eq!(sink.pending(), 0);
        assert_eq!(*sink.flushes.lock(), 1);

        let buffer = scheduler.schedule(1, silence(0.5, 24000));
        assert_eq!(buffer.start_time, 0.5);
    }

    #[test]
    fn test_advertised_rate_parsing() {
        let mut c = chunk(0, 0.01, 24000);
        assert_eq!(c.advertised_rate(), Some(24000));
        c.mime_type = Some("audio/pcm".to_string());
        assert_eq!(c.advertised_rate(), None);
        c.mime_type = Some("audio/pcm; rate=16000".to_string());
        assert_eq!(c.advertised_rate(), Some(16000));
        c.mime_type = None;
        assert_eq!(c.advertised_rate(), None);
    }
}
