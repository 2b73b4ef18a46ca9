//! Float <-> PCM16 sample conversion and little-endian byte packing.

use crate::error::DecodeError;

/// Convert one normalized sample to PCM16: `round(clamp(s, -1, 1) * 32767)`.
///
/// NaN maps to silence.
pub fn encode_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Convert one PCM16 sample back to a normalized float (`s / 32768`).
pub fn decode_sample(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

pub fn encode_samples(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(encode_sample).collect()
}

pub fn decode_samples(samples: &[i16]) -> Vec<f32> {
    samples.iter().copied().map(decode_sample).collect()
}

/// Pack PCM16 samples as little-endian bytes.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Unpack little-endian bytes into PCM16 samples.
pub fn from_le_bytes(bytes: &[u8]) -> Result<Vec<i16>, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::InvalidAudio(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
