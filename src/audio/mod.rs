//! Audio capabilities: PCM16 conversion, capture framing, and playback.

pub mod capture;
pub mod device;
pub mod pcm;
pub mod pipeline;
pub mod playback;
pub mod types;

pub use capture::{CaptureFramer, CaptureTarget};
pub use device::{AudioError, AudioSink, AudioSource};
pub use pipeline::AudioPipeline;
pub use playback::PlaybackQueue;
pub use types::*;
