//! Capture side: re-block device samples and hand them to the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::device::{AudioSource, Lease};
use crate::error::SendError;

/// Receiver of captured blocks (the client session).
pub trait CaptureTarget: Send + Sync + 'static {
    /// Whether a block would be accepted right now.
    fn is_accepting(&self) -> bool;

    /// Encode and enqueue one block. Must not wait on the network.
    fn send_block(&self, samples: &[f32]) -> Result<(), SendError>;
}

/// Splits arbitrary device callbacks into fixed-size blocks.
#[derive(Debug)]
pub struct CaptureFramer {
    block_size: usize,
    pending: Vec<f32>,
}

impl CaptureFramer {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples and drain every complete block, in capture order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let mut blocks = Vec::new();
        while self.pending.len() >= self.block_size {
            let rest = self.pending.split_off(self.block_size);
            blocks.push(std::mem::replace(&mut self.pending, rest));
        }
        blocks
    }

    /// Discard a partial block.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

pub(crate) async fn run_capture(
    mut source: Lease<dyn AudioSource>,
    mut framer: CaptureFramer,
    mic_enabled: Arc<AtomicBool>,
    target: Arc<dyn CaptureTarget>,
) {
    while let Some(samples) = source.next_block().await {
        if !mic_enabled.load(Ordering::Acquire) || !target.is_accepting() {
            framer.clear();
            tracing::trace!(samples = samples.len(), "Dropping captured block");
            continue;
        }
        for block in framer.push(&samples) {
            if let Err(error) = target.send_block(&block) {
                tracing::warn!(error = %error, "Captured block not sent");
            }
        }
    }
    tracing::debug!("Capture source ended");
}
