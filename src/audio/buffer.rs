//! Audio buffers
//!
//! [`SampleRing`] is a lock-free single-producer single-consumer queue of
//! mono samples between a capture callback and the tick. [`JitterBuffer`]
//! is the per-sender FIFO of decoded voice frames waiting to be played.

use crossbeam::queue::ArrayQueue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::PeerId;

/// Lock-free ring of captured samples
pub struct SampleRing {
    queue: ArrayQueue<f32>,
    overflow_count: AtomicUsize,
}

impl SampleRing {
    /// Create a new ring with room for `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push samples, dropping the newest ones once full.
    /// Returns how many were stored.
    pub fn push_slice(&self, samples: &[f32]) -> usize {
        let mut stored = 0;
        for &sample in samples {
            if self.queue.push(sample).is_err() {
                self.overflow_count
                    .fetch_add(samples.len() - stored, Ordering::Relaxed);
                break;
            }
            stored += 1;
        }
        stored
    }

    /// Pop exactly `count` samples, or nothing if fewer are queued
    pub fn pop_exact(&self, count: usize) -> Option<Vec<f32>> {
        if self.queue.len() < count {
            return None;
        }
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            match self.queue.pop() {
                Some(sample) => out.push(sample),
                None => break,
            }
        }
        Some(out)
    }

    /// Drop everything queued
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Get current length in samples
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get ring capacity
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Get samples lost to overflow
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a sample ring
pub type SharedSampleRing = Arc<SampleRing>;

/// Create a new shared sample ring
pub fn create_shared_ring(capacity: usize) -> SharedSampleRing {
    Arc::new(SampleRing::new(capacity))
}

/// One decoded voice payload
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceFrame {
    pub sender: PeerId,
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl VoiceFrame {
    pub fn new(sender: PeerId, samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            sender,
            samples,
            sample_rate,
        }
    }

    /// Real-time length of the frame: `samples / sample_rate`
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Per-sender FIFO of voice frames. No reordering: frames play in arrival order.
pub struct JitterBuffer {
    frames: VecDeque<VoiceFrame>,
    capacity: usize,
    /// Frames required before playback may start
    start_depth: usize,
    stats: JitterBufferStats,
}

impl JitterBuffer {
    pub fn new(capacity: usize, start_depth: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            start_depth: start_depth.clamp(1, capacity),
            stats: JitterBufferStats::default(),
        }
    }

    /// Queue a frame. When full the oldest frame is discarded; returns false then.
    pub fn push(&mut self, frame: VoiceFrame) -> bool {
        self.stats.received += 1;
        let mut kept_all = true;
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
            self.stats.overflow += 1;
            kept_all = false;
        }
        self.frames.push_back(frame);
        kept_all
    }

    /// Take the oldest frame
    pub fn pop(&mut self) -> Option<VoiceFrame> {
        let frame = self.frames.pop_front()?;
        self.stats.played += 1;
        Some(frame)
    }

    /// Whether enough is buffered to begin a playback run
    pub fn ready_to_start(&self) -> bool {
        self.frames.len() >= self.start_depth
    }

    /// Drop every queued frame
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        self.stats.cleared += dropped as u64;
        dropped
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get statistics
    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.frames.len(),
            ..self.stats.clone()
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterBufferStats {
    pub level: usize,
    pub received: u64,
    pub played: u64,
    pub overflow: u64,
    pub cleared: u64,
}
