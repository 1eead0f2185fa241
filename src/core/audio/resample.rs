//! Streaming sample-rate conversion.
//!
//! Device blocks and inbound chunks arrive in arbitrary sizes. A
//! [`StreamResampler`] keeps the FFT resampler state and the unprocessed tail
//! between calls, so splitting a signal into blocks does not change its
//! length or introduce phase jumps. The resampler's filter delay is trimmed
//! from the front of the output, and [`StreamResampler::flush`] emits the
//! tail so that a finished stream has exactly `round(input * to / from)`
//! samples.

use rubato::{FftFixedIn, Resampler};

use crate::core::error::{LiveError, LiveResult};

/// Input processed per FFT call, as a fraction of a second (20 ms).
const CHUNKS_PER_SECOND: u32 = 50;

/// Sub-chunks per FFT call.
const SUB_CHUNKS: usize = 2;

/// Upper bound on partial passes when flushing the filter tail.
const MAX_FLUSH_PASSES: usize = 8;

/// Stateful mono resampler. Passes samples through when the rates match.
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    /// Leading output samples still to discard for the filter delay
    delay_remaining: usize,
    consumed: u64,
    produced: u64,
}

impl StreamResampler {
    /// Create a resampler from `from_rate` to `to_rate`.
    ///
    /// # Errors
    ///
    /// [`LiveError::InvalidConfiguration`] for a zero rate or a ratio the
    /// FFT resampler cannot handle.
    pub fn new(from_rate: u32, to_rate: u32) -> LiveResult<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(LiveError::InvalidConfiguration(
                "sample rates must be positive".to_string(),
            ));
        }

        let resampler = if from_rate == to_rate {
            None
        } else {
            let chunk_size = (from_rate / CHUNKS_PER_SECOND).max(1) as usize;
            let resampler = FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                chunk_size,
                SUB_CHUNKS,
                1,
            )
            .map_err(|e| {
                LiveError::InvalidConfiguration(format!(
                    "cannot resample {} Hz to {} Hz: {}",
                    from_rate, to_rate, e
                ))
            })?;
            tracing::debug!(
                from_rate,
                to_rate,
                chunk_size = resampler.input_frames_next(),
                delay = resampler.output_delay(),
                "Created resampler"
            );
            Some(resampler)
        };

        let delay_remaining = resampler.as_ref().map_or(0, |r| r.output_delay());
        Ok(Self {
            from_rate,
            to_rate,
            resampler,
            pending: Vec::new(),
            delay_remaining,
            consumed: 0,
            produced: 0,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Samples buffered but not yet converted.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Convert one block. Output may lag input by up to one chunk plus the
    /// filter delay; the lag is emitted by later calls or by [`flush`](Self::flush).
    pub fn process(&mut self, block: &[f32]) -> LiveResult<Vec<f32>> {
        self.consumed += block.len() as u64;
        let Some(resampler) = self.resampler.as_mut() else {
            self.produced += block.len() as u64;
            return Ok(block.to_vec());
        };

        self.pending.extend_from_slice(block);
        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let frames = resampler.process(&[chunk], None).map_err(resample_error)?;
            emit(
                &frames[0],
                &mut self.delay_remaining,
                &mut self.produced,
                u64::MAX,
                &mut out,
            );
        }
        Ok(out)
    }

    /// Emit everything still held back and start a fresh stream.
    pub fn flush(&mut self) -> LiveResult<Vec<f32>> {
        let target = self.expected_len();
        let mut out = Vec::new();

        if let Some(resampler) = self.resampler.as_mut() {
            let mut passes = 0;
            while self.produced < target && passes < MAX_FLUSH_PASSES {
                let tail = [std::mem::take(&mut self.pending)];
                let wave_in = if tail[0].is_empty() {
                    None
                } else {
                    Some(&tail[..])
                };
                let frames = resampler
                    .process_partial(wave_in, None)
                    .map_err(resample_error)?;
                emit(
                    &frames[0],
                    &mut self.delay_remaining,
                    &mut self.produced,
                    target,
                    &mut out,
                );
                passes += 1;
            }
        }

        self.reset();
        Ok(out)
    }

    /// Drop buffered input and filter state.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.consumed = 0;
        self.produced = 0;
        self.delay_remaining = match self.resampler.as_mut() {
            Some(resampler) => {
                resampler.reset();
                resampler.output_delay()
            }
            None => 0,
        };
    }

    fn expected_len(&self) -> u64 {
        (self.consumed as f64 * self.to_rate as f64 / self.from_rate as f64).round() as u64
    }
}

/// Append `frames` to `out`, skipping the remaining delay and stopping at `limit`.
fn emit(
    frames: &[f32],
    delay_remaining: &mut usize,
    produced: &mut u64,
    limit: u64,
    out: &mut Vec<f32>,
) {
    let skip = (*delay_remaining).min(frames.len());
    *delay_remaining -= skip;
    let room = limit.saturating_sub(*produced);
    let take = ((frames.len() - skip) as u64).min(room) as usize;
    out.extend_from_slice(&frames[skip..skip + take]);
    *produced += take as u64;
}

fn resample_error(e: rubato::ResampleError) -> LiveError {
    LiveError::Internal(format!("resampling failed: {}", e))
}
