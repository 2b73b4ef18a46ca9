//! Playback side: strict FIFO of received chunks, one rendering at a time.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};

use super::device::{AudioSink, Lease};
use super::types::AudioChunk;

/// FIFO of received chunks plus the "currently playing" flag.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    queue: VecDeque<AudioChunk>,
    playing: bool,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an arriving chunk. Returns it back if nothing is playing and it
    /// should start now; otherwise it is queued behind the current chunk.
    pub fn enqueue(&mut self, chunk: AudioChunk) -> Option<AudioChunk> {
        if self.playing {
            self.queue.push_back(chunk);
            None
        } else {
            self.playing = true;
            Some(chunk)
        }
    }

    /// The current chunk finished; returns the next one to start, if any.
    pub fn finished(&mut self) -> Option<AudioChunk> {
        let next = self.queue.pop_front();
        self.playing = next.is_some();
        next
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

pub(crate) async fn run_playback(
    mut sink: Lease<dyn AudioSink>,
    mut chunks: mpsc::UnboundedReceiver<AudioChunk>,
) {
    let mut queue = PlaybackQueue::new();
    let mut rendering: Option<oneshot::Receiver<()>> = None;

    loop {
        tokio::select! {
            incoming = chunks.recv() => match incoming {
                Some(chunk) => {
                    if let Some(chunk) = queue.enqueue(chunk) {
                        rendering = start_rendering(&mut sink, &mut queue, chunk);
                    }
                }
                None => break,
            },
            _ = wait_rendered(&mut rendering), if rendering.is_some() => {
                rendering = None;
                if let Some(chunk) = queue.finished() {
                    rendering = start_rendering(&mut sink, &mut queue, chunk);
                }
            }
        }
    }
    tracing::debug!(queued = queue.queued(), "Playback stopped");
}

/// Start `chunk`; a chunk the sink refuses is skipped in favour of the next.
fn start_rendering(
    sink: &mut Lease<dyn AudioSink>,
    queue: &mut PlaybackQueue,
    mut chunk: AudioChunk,
) -> Option<oneshot::Receiver<()>> {
    loop {
        match sink.play(chunk.to_normalized(), chunk.sample_rate) {
            Ok(done) => return Some(done),
            Err(error) => {
                tracing::warn!(error = %error, samples = chunk.len(), "Skipping unplayable chunk");
                chunk = queue.finished()?;
            }
        }
    }
}

async fn wait_rendered(rendering: &mut Option<oneshot::Receiver<()>>) {
    if let Some(done) = rendering {
        // A dropped sender also counts as finished.
        let _ = done.await;
    }
}
