//! Sample conversion between float audio, 16-bit PCM and transport text.
//!
//! All functions here are pure. PCM is signed 16-bit little-endian, mono.

use base64::prelude::*;

use crate::core::error::{LiveError, LiveResult};

/// Scale between normalized float samples and 16-bit PCM.
const PCM16_SCALE: f32 = 32768.0;

/// One quantization step of 16-bit PCM expressed in the float domain.
pub const PCM16_STEP: f32 = 1.0 / PCM16_SCALE;

/// Convert float samples in [-1, 1] to little-endian 16-bit PCM bytes.
///
/// Samples outside the range are clamped; NaN is treated as silence.
/// Scaling truncates toward zero.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = if sample.is_nan() {
            0.0
        } else {
            sample.clamp(-1.0, 1.0)
        };
        let value = (clamped * PCM16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Convert little-endian 16-bit PCM bytes back to float samples.
///
/// # Errors
///
/// Returns [`LiveError::MalformedAudio`] if the byte length is odd.
pub fn pcm16_to_float(bytes: &[u8]) -> LiveResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(LiveError::MalformedAudio(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / PCM16_SCALE)
        .collect())
}

/// Encode binary data as transport-safe text (standard base64 with padding).
pub fn bytes_to_transport_text(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode transport text produced by [`bytes_to_transport_text`].
///
/// # Errors
///
/// Returns [`LiveError::MalformedAudio`] if the text is not valid base64.
pub fn transport_text_to_bytes(text: &str) -> LiveResult<Vec<u8>> {
    BASE64_STANDARD
        .decode(text)
        .map_err(|e| LiveError::MalformedAudio(format!("invalid transport encoding: {}", e)))
}

/// Downmix interleaved multi-channel audio to mono by averaging channels.
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
