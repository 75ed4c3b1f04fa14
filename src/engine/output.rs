//! The callback-facing side of the output ring.
//!
//! `OutputQueue` is the only state the playback callback thread ever
//! touches: the lock-free output ring, the underflow counter and the
//! warm-up deadline, all updated without locking so the hard-real-time
//! callback stays bounded regardless of worker pace.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::audio::AudioPull;
use crate::dsp::RingBuffer;

pub(crate) struct OutputQueue {
    pub(crate) ring: RingBuffer,
    channels: usize,
    underflows: AtomicU64,
    /// Reference point for the lock-free warm-up check.
    base: Instant,
    warmup: Duration,
    /// Nanoseconds after `base` when the warm-up window ends; `u64::MAX`
    /// until the engine finishes starting its streams.
    warmup_deadline_ns: AtomicU64,
}

impl OutputQueue {
    pub(crate) fn new(ring: RingBuffer, warmup: Duration) -> Self {
        let channels = ring.channels();
        Self {
            ring,
            channels,
            underflows: AtomicU64::new(0),
            base: Instant::now(),
            warmup,
            warmup_deadline_ns: AtomicU64::new(u64::MAX),
        }
    }

    /// Begin the warm-up grace window. Called once both streams are live.
    pub(crate) fn mark_started(&self) {
        let deadline = self.base.elapsed() + self.warmup;
        self.warmup_deadline_ns.store(deadline.as_nanos() as u64, Ordering::Release);
    }

    pub(crate) fn underflow_count(&self) -> u64 {
        self.underflows.load(Ordering::Relaxed)
    }

    fn warming_up(&self) -> bool {
        (self.base.elapsed().as_nanos() as u64) < self.warmup_deadline_ns.load(Ordering::Acquire)
    }
}

impl AudioPull for OutputQueue {
    /// Drain up to `frames` frames; zero-fill any shortfall so the caller
    /// never receives uninitialized data, and count the shortfall as
    /// underflow unless the warm-up window is still open. Always reports
    /// the full requested count.
    fn pull_to(&self, dst: &mut [f32], frames: usize) -> usize {
        let ch = self.channels;
        let mut total = 0;
        while total < frames {
            let got = self.ring.read_interleaved(&mut dst[total * ch..], frames - total);
            if got == 0 {
                break;
            }
            total += got;
        }
        if total < frames {
            dst[total * ch..frames * ch].fill(0.0);
            if !self.warming_up() {
                self.underflows.fetch_add((frames - total) as u64, Ordering::Relaxed);
            }
        }
        frames
    }
}
