//! Audio-related types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::pcm;

/// Negotiated wire sample rate (mono PCM16).
pub const SAMPLE_RATE: u32 = 24_000;

/// Samples delivered per capture callback.
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Wire audio format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Pcm16,
}

impl AudioFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
        }
    }
}

/// Capture and playback settings requested from local devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub capture_block_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::Pcm16,
            sample_rate: SAMPLE_RATE,
            capture_block_size: CAPTURE_BLOCK_SIZE,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// A unit of mono PCM16 audio received from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn received(samples: Vec<i16>) -> Self {
        Self {
            samples,
            sample_rate: SAMPLE_RATE,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length at the chunk's sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Normalized float samples for rendering.
    pub fn to_normalized(&self) -> Vec<f32> {
        pcm::decode_samples(&self.samples)
    }
}
