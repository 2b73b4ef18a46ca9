//! Owns the capture and playback devices for one session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::capture::{run_capture, CaptureFramer, CaptureTarget};
use super::device::{AudioError, AudioSink, AudioSource, Lease};
use super::playback::run_playback;
use super::types::{AudioChunk, AudioSettings};

/// Running capture and playback tasks. Both devices are released when the
/// pipeline is shut down or dropped, whichever comes first.
pub struct AudioPipeline {
    mic_enabled: Arc<AtomicBool>,
    playback_tx: mpsc::UnboundedSender<AudioChunk>,
    capture_task: Option<JoinHandle<()>>,
    playback_task: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    /// Acquire both devices and start pumping. If either device fails to
    /// open, anything already acquired is released before returning.
    pub fn start(
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
        settings: &AudioSettings,
        target: Arc<dyn CaptureTarget>,
    ) -> Result<Self, AudioError> {
        let source = Lease::acquire_source(source, settings)?;
        let sink = Lease::acquire_sink(sink, settings.sample_rate)?;

        let mic_enabled = Arc::new(AtomicBool::new(true));
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();

        let capture_task = tokio::spawn(run_capture(
            source,
            CaptureFramer::new(settings.capture_block_size),
            Arc::clone(&mic_enabled),
            target,
        ));
        let playback_task = tokio::spawn(run_playback(sink, playback_rx));

        tracing::debug!(
            sample_rate = settings.sample_rate,
            block_size = settings.capture_block_size,
            "Audio pipeline started"
        );
        Ok(Self {
            mic_enabled,
            playback_tx,
            capture_task: Some(capture_task),
            playback_task: Some(playback_task),
        })
    }

    /// A clonable handle for feeding playback from event handlers.
    pub fn playback_handle(&self) -> mpsc::UnboundedSender<AudioChunk> {
        self.playback_tx.clone()
    }

    pub fn set_mic_enabled(&self, enabled: bool) {
        self.mic_enabled.store(enabled, Ordering::Release);
    }

    /// Stop both tasks and wait until the devices have been released.
    pub async fn shutdown(mut self) {
        for task in self.take_tasks() {
            task.abort();
            let _ = task.await;
        }
        tracing::debug!("Audio pipeline released");
    }

    fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        self.capture_task
            .take()
            .into_iter()
            .chain(self.playback_task.take())
            .collect()
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        for task in self.take_tasks() {
            task.abort();
        }
    }
}
