use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::error::PipelineError;
use crate::metrics::MetricsSink;
use crate::pipeline::Frame;
use crate::raster::PixelBuffer;

/// Fixed set of reusable frames, cycled through a free-list channel.
///
/// A frame is owned by exactly one party at a time: the free list, the
/// generation stage, the handoff channel, or the presenter. Claiming from
/// the free list is the only way to obtain one, which also serializes
/// concurrent producers.
pub struct BufferPool {
    free_tx: Sender<Frame>,
    free_rx: Receiver<Frame>,
    capacity: usize,
    frame_bytes: usize,
    metrics: Arc<dyn MetricsSink>,
}

impl BufferPool {
    /// Allocate `capacity` frames of `width` x `height` cells
    pub fn new(
        capacity: usize,
        width: u32,
        height: u32,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, PipelineError> {
        let (free_tx, free_rx) = bounded(capacity);
        let mut pool = Self {
            free_tx,
            free_rx,
            capacity: 0,
            frame_bytes: 0,
            metrics,
        };

        for _ in 0..capacity {
            let pixels = PixelBuffer::try_new(width, height)?;
            pool.frame_bytes = pixels.byte_size();
            pool.metrics.on_buffer_allocated(pool.frame_bytes);
            pool.capacity += 1;
            pool.recycle(Frame::new(pixels));
        }

        log::debug!(
            "Allocated {} frame buffers of {}x{} ({} bytes each)",
            capacity,
            width,
            height,
            pool.frame_bytes
        );
        Ok(pool)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently sitting in the free list
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Handle the generation stage claims frames from
    pub(crate) fn claimer(&self) -> Receiver<Frame> {
        self.free_rx.clone()
    }

    /// Handle the presentation stage returns frames through
    pub(crate) fn returner(&self) -> Sender<Frame> {
        self.free_tx.clone()
    }

    /// Return a frame to the free list
    pub fn recycle(&self, frame: Frame) {
        give_back(&self.free_tx, frame, self.metrics.as_ref());
    }

    /// Drop every frame in the free list, reporting each release
    fn release_all(&mut self) -> usize {
        let mut released = 0;
        loop {
            match self.free_rx.try_recv() {
                Ok(_) => {
                    self.metrics.on_buffer_released(self.frame_bytes);
                    released += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        released
    }
}

/// Push `frame` onto a free list; a frame with nowhere to go is dropped and
/// reported released.
///
/// Only a full list (a foreign frame) or a dropped pool can refuse one.
pub(crate) fn give_back(free: &Sender<Frame>, frame: Frame, metrics: &dyn MetricsSink) {
    let bytes = frame.pixels.byte_size();
    if free.try_send(frame).is_err() {
        log::warn!("Frame pool full or gone; dropping frame");
        metrics.on_buffer_released(bytes);
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let released = self.release_all();
        if released < self.capacity {
            log::warn!(
                "Frame pool dropped with {} of {} frames outstanding",
                self.capacity - released,
                self.capacity
            );
        }
    }
}
