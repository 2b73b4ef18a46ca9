//! Local media capabilities injected into the pipeline.
//!
//! Real capture and rendering devices live outside this crate; tests use
//! in-memory fakes.

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use super::types::AudioSettings;
use crate::error::RealtimeError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Failed to open audio device: {0}")]
    Open(String),

    #[error("Failed to render audio: {0}")]
    Playback(String),

    #[error("Audio device error: {0}")]
    Device(String),
}

impl From<AudioError> for RealtimeError {
    fn from(error: AudioError) -> Self {
        RealtimeError::Audio(error.to_string())
    }
}

/// Capture device delivering blocks of normalized `[-1, 1]` samples.
#[async_trait]
pub trait AudioSource: Send + 'static {
    /// Acquire the device. Mono at `settings.sample_rate`, with echo
    /// cancellation and noise suppression as requested.
    fn open(&mut self, settings: &AudioSettings) -> Result<(), AudioError>;

    /// Next captured block; `None` once the device stops producing.
    async fn next_block(&mut self) -> Option<Vec<f32>>;

    /// Release the device.
    fn close(&mut self);
}

/// Rendering context for decoded agent audio.
pub trait AudioSink: Send + 'static {
    fn open(&mut self, sample_rate: u32) -> Result<(), AudioError>;

    /// Begin rendering one buffer. The receiver resolves when it has finished.
    fn play(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<oneshot::Receiver<()>, AudioError>;

    /// Release the rendering context.
    fn close(&mut self);
}

/// Exclusive hold on an opened device; releases it exactly once on drop.
pub(crate) struct Lease<T: ?Sized> {
    device: Option<Box<T>>,
    release: fn(&mut T),
}

impl<T: ?Sized> Lease<T> {
    pub(crate) fn new(device: Box<T>, release: fn(&mut T)) -> Self {
        Self {
            device: Some(device),
            release,
        }
    }
}

impl Lease<dyn AudioSource> {
    pub(crate) fn acquire_source(
        mut source: Box<dyn AudioSource>,
        settings: &AudioSettings,
    ) -> Result<Self, AudioError> {
        source.open(settings)?;
        Ok(Self::new(source, |device| device.close()))
    }
}

impl Lease<dyn AudioSink> {
    pub(crate) fn acquire_sink(
        mut sink: Box<dyn AudioSink>,
        sample_rate: u32,
    ) -> Result<Self, AudioError> {
        sink.open(sample_rate)?;
        Ok(Self::new(sink, |device| device.close()))
    }
}

impl<T: ?Sized> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.device {
            Some(device) => &**device,
            None => unreachable!("lease device is only taken on drop"),
        }
    }
}

impl<T: ?Sized> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.device {
            Some(device) => &mut **device,
            None => unreachable!("lease device is only taken on drop"),
        }
    }
}

impl<T: ?Sized> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            (self.release)(&mut *device);
        }
    }
}
