//! # Ring Buffer Module
//!
//! Single-producer / single-consumer sample store shared between the driver
//! callback and the processing thread.
//!
//! ## Protocol
//! - The producer writes whole 128-sample frames and never waits, even when
//!   the consumer has fallen behind. Old samples are overwritten and the
//!   overrun is counted.
//! - The consumer copies the most recent analysis window once per new step.
//!   When several steps are pending it jumps to the newest one and counts the
//!   ones it skipped.
//! - Both sides agree through a single sequence word used as a seqlock. It
//!   holds twice the number of published frames and is odd while a frame is
//!   being written. Samples are stored as `AtomicU32` bit patterns, so a copy
//!   that races the writer is merely torn, detected, and retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering, fence};
use std::thread;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::FrameError;

const MAX_SNAPSHOT_RETRIES: usize = 8;

struct Shared {
    samples: Box<[AtomicU32]>,
    capacity: u64,
    frame_size: usize,
    sequence: AtomicU64,
    /// Absolute end position of the last window the consumer took.
    consumed: AtomicU64,
    closed: AtomicBool,
    overruns: AtomicU64,
    malformed: AtomicU64,
}

impl Shared {
    /// Samples fully published so far.
    fn published(&self) -> u64 {
        (self.sequence.load(Ordering::Acquire) / 2) * self.frame_size as u64
    }
}

/// Creates the two ends of a ring sized by `config`.
///
/// The configuration is expected to have passed `PipelineConfig::validate`.
pub fn ring_buffer(config: &PipelineConfig) -> (RingProducer, RingConsumer) {
    let capacity = config.ring_capacity.max(config.window_size);
    let samples = (0..capacity)
        .map(|_| AtomicU32::new(0))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Shared {
        samples,
        capacity: capacity as u64,
        frame_size: config.frame_size,
        sequence: AtomicU64::new(0),
        consumed: AtomicU64::new(0),
        closed: AtomicBool::new(false),
        overruns: AtomicU64::new(0),
        malformed: AtomicU64::new(0),
    });

    let producer = RingProducer {
        shared: Arc::clone(&shared),
    };
    let consumer = RingConsumer {
        shared,
        window: vec![0.0; config.window_size],
        next_end: config.frame_size as u64,
        skipped_steps: 0,
    };
    (producer, consumer)
}

/// Write side, owned by the audio driver callback.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Publishes one frame.
    ///
    /// Never blocks and never allocates. A frame of the wrong length is a
    /// fatal input fault: it is counted and the ring closes.
    pub fn push(&mut self, frame: &[f32]) -> Result<(), FrameError> {
        let shared = &*self.shared;
        if shared.closed.load(Ordering::Relaxed) {
            return Err(FrameError::Closed);
        }

        let frame_size = shared.frame_size;
        if frame.len() != frame_size {
            shared.malformed.fetch_add(1, Ordering::Relaxed);
            shared.closed.store(true, Ordering::Release);
            return Err(FrameError::WrongLength {
                expected: frame_size,
                actual: frame.len(),
            });
        }

        let sequence = shared.sequence.load(Ordering::Relaxed);
        let start = (sequence / 2) * frame_size as u64;
        if start + frame_size as u64 > shared.consumed.load(Ordering::Acquire) + shared.capacity {
            shared.overruns.fetch_add(1, Ordering::Relaxed);
        }

        shared.sequence.store(sequence + 1, Ordering::Relaxed);
        fence(Ordering::Release);

        let offset = (start % shared.capacity) as usize;
        for (cell, sample) in shared.samples[offset..offset + frame_size]
            .iter()
            .zip(frame)
        {
            cell.store(sample.to_bits(), Ordering::Relaxed);
        }

        shared.sequence.store(sequence + 2, Ordering::Release);
        Ok(())
    }

    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Relaxed)
    }
}

impl Drop for RingProducer {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// A copy of the newest `window_size` samples, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisWindow<'a> {
    samples: &'a [f32],
    end_position: u64,
    frame_size: usize,
}

impl<'a> AnalysisWindow<'a> {
    /// Wraps samples whose last element sits just before `end_position`.
    pub fn new(samples: &'a [f32], end_position: u64, frame_size: usize) -> Self {
        Self {
            samples,
            end_position,
            frame_size,
        }
    }

    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    /// Absolute sample position one past the newest sample.
    pub fn end_position(&self) -> u64 {
        self.end_position
    }

    /// Absolute position of the first sample of the newest frame.
    pub fn frame_start(&self) -> u64 {
        self.end_position.saturating_sub(self.frame_size as u64)
    }

    /// The newest frame, used for transient detection.
    pub fn newest_frame(&self) -> &'a [f32] {
        let from = self.samples.len().saturating_sub(self.frame_size);
        &self.samples[from..]
    }
}

/// Read side, owned by the processing thread.
pub struct RingConsumer {
    shared: Arc<Shared>,
    window: Vec<f32>,
    /// Smallest end position that counts as a new step.
    next_end: u64,
    skipped_steps: u64,
}

impl RingConsumer {
    /// True once at least one full frame has arrived since the last snapshot.
    pub fn step_ready(&self) -> bool {
        self.shared.published() >= self.next_end
    }

    /// Sleeps in `poll` increments until a step is ready.
    ///
    /// Returns `false` when `running` is cleared or the ring is closed first.
    pub fn wait_for_step(&self, running: &AtomicBool, poll: Duration) -> bool {
        loop {
            if self.step_ready() {
                return true;
            }
            if !running.load(Ordering::Acquire) || self.is_closed() {
                return false;
            }
            thread::sleep(poll);
        }
    }

    /// Copies the newest window into the consumer's scratch and returns it.
    ///
    /// Returns `None` when no new step is available, or when the writer kept
    /// lapping the copy for every retry.
    pub fn snapshot(&mut self) -> Option<AnalysisWindow<'_>> {
        let shared = &*self.shared;
        let frame = shared.frame_size as u64;
        let window_len = self.window.len() as u64;

        for _ in 0..MAX_SNAPSHOT_RETRIES {
            let before = shared.sequence.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let end = (before / 2) * frame;
            if end < self.next_end {
                return None;
            }
            let start = end.saturating_sub(window_len);
            let missing = (window_len - (end - start)) as usize;

            self.window[..missing].fill(0.0);
            for (offset, sample) in self.window[missing..].iter_mut().enumerate() {
                let position = start + offset as u64;
                let bits = shared.samples[(position % shared.capacity) as usize]
                    .load(Ordering::Relaxed);
                *sample = f32::from_bits(bits);
            }

            fence(Ordering::Acquire);
            let after = shared.sequence.load(Ordering::Relaxed);
            if after != before {
                // End of the region the writer has touched, including a frame in flight.
                let touched = (after / 2 + (after & 1)) * frame;
                if touched > start + shared.capacity {
                    continue;
                }
            }

            self.skipped_steps += (end - self.next_end) / frame;
            self.next_end = end + frame;
            shared.consumed.store(end, Ordering::Release);

            return Some(AnalysisWindow::new(&self.window, end, shared.frame_size));
        }
        None
    }

    /// Publication steps that were never analysed because a newer one existed.
    pub fn skipped_steps(&self) -> u64 {
        self.skipped_steps
    }

    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    pub fn malformed_frames(&self) -> u64 {
        self.shared.malformed.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Read-only handle onto the shared counters.
    pub fn monitor(&self) -> RingMonitor {
        RingMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for RingConsumer {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Observes ring counters from outside the real-time contexts and can close
/// the ring so the producer starts refusing frames.
#[derive(Clone)]
pub struct RingMonitor {
    shared: Arc<Shared>,
}

impl RingMonitor {
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    pub fn malformed_frames(&self) -> u64 {
        self.shared.malformed.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
