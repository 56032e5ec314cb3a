//! Bounded frame buffer between decoder and pipeline
//!
//! A crossbeam bounded channel sized max(FRAME_BUFFER_MIN, 2 x workers),
//! further capped so capacity x MAX_FRAME_BYTES stays under the memory
//! ceiling. The producer blocks when the buffer is full; that
//! back-pressure is what keeps a fast decoder from outrunning slow
//! detectors.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use qualscan_core::limits::{FRAME_BUFFER_MIN, MAX_FRAME_BYTES};
use qualscan_core::Frame;

/// One sampled frame in flight between decoder and pipeline
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Index in the source stream
    pub index: u64,
    pub timestamp: f64,
    pub frame: Arc<Frame>,
}

/// Capacity for a worker count under a memory ceiling in bytes
pub fn buffer_capacity(workers: usize, memory_ceiling: usize) -> usize {
    let wanted = FRAME_BUFFER_MIN.max(2 * workers);
    let afford = (memory_ceiling / MAX_FRAME_BYTES).max(1);
    wanted.min(afford)
}

/// Producer/consumer pair over a bounded channel
pub fn frame_buffer(capacity: usize) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        FrameProducer { tx },
        FrameConsumer {
            rx,
            capacity: capacity.max(1),
        },
    )
}

pub struct FrameProducer {
    tx: Sender<SampledFrame>,
}

impl FrameProducer {
    /// Blocks while the buffer is full; returns false when the consumer
    /// side is gone and the producer should stop decoding.
    pub fn push(&self, frame: SampledFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

pub struct FrameConsumer {
    rx: Receiver<SampledFrame>,
    capacity: usize,
}

impl FrameConsumer {
    /// Next sampled frame; `None` when the producer closed the channel
    pub fn pop(&self) -> Option<SampledFrame> {
        self.rx.recv().ok()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently queued (diagnostics only)
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
