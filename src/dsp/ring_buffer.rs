//! Lock-free SPSC ring buffer for interleaved multi-channel audio frames.
//!
//! Cursor indices count frames; the backing store holds interleaved f32
//! samples. Capacity is rounded up to a power of two so wraparound reduces
//! to a bitmask. Exactly one thread may ever write and exactly one thread
//! may ever read: the release store on a cursor, paired with the acquire
//! load on the other side, guarantees that a consumer observing an advanced
//! write cursor also observes the fully-written payload.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Error returned when a ring buffer is created with a zero dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ring buffer dimensions must be positive (got {capacity_frames} frames x {channels} channels)")]
pub struct InvalidRingSize {
    pub capacity_frames: usize,
    pub channels: usize,
}

/// Lock-free single-producer/single-consumer FIFO of interleaved frames.
///
/// A frame is one sample per channel; all accounting is in frames, never
/// raw samples. The read and write cursors increase monotonically and are
/// reduced modulo capacity only when indexing the storage, so
/// `write - read` is always the exact occupancy.
pub struct RingBuffer {
    data: UnsafeCell<Box<[f32]>>, // capacity * channels interleaved samples
    channels: usize,
    capacity: usize, // frames, always a power of two
    mask: u64,
    read: AtomicU64,  // frame units
    write: AtomicU64, // frame units
}

// SAFETY: the producer only touches samples between the write and read
// cursors, the consumer only samples between the read and write cursors,
// and each cursor is advanced with a release store strictly after the copy
// it publishes. The SPSC contract (one writer thread, one reader thread)
// is a documented precondition of write_interleaved/read_interleaved.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a ring holding `capacity_frames` frames of `channels` samples.
    ///
    /// The capacity is rounded up to the next power of two (minimum 2).
    ///
    /// # Errors
    /// Fails if either argument is zero.
    pub fn new(capacity_frames: usize, channels: usize) -> Result<Self, InvalidRingSize> {
        if capacity_frames == 0 || channels == 0 {
            return Err(InvalidRingSize { capacity_frames, channels });
        }
        let capacity = capacity_frames.next_power_of_two().max(2);
        Ok(Self {
            data: UnsafeCell::new(vec![0.0f32; capacity * channels].into_boxed_slice()),
            channels,
            capacity,
            mask: (capacity - 1) as u64,
            read: AtomicU64::new(0),
            write: AtomicU64::new(0),
        })
    }

    /// Samples per frame.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Actual (rounded-up) capacity in frames.
    pub fn capacity_frames(&self) -> usize {
        self.capacity
    }

    /// Frames currently available to read.
    pub fn available_to_read(&self) -> usize {
        let r = self.read.load(Ordering::Acquire);
        let w = self.write.load(Ordering::Acquire);
        (w - r) as usize
    }

    /// Free frames available to write. Always `capacity - available_to_read()`.
    pub fn available_to_write(&self) -> usize {
        self.capacity - self.available_to_read()
    }

    /// Write up to `frames` interleaved frames from `src`.
    ///
    /// Clamps to the current free space and returns the frames actually
    /// written; a return smaller than the request means the deficit was
    /// dropped by the caller (overflow). Only one thread may ever call this.
    pub fn write_interleaved(&self, src: &[f32], frames: usize) -> usize {
        let frames = frames.min(self.available_to_write());
        if frames == 0 {
            return 0;
        }
        debug_assert!(src.len() >= frames * self.channels);

        let w = self.write.load(Ordering::Relaxed);
        let offset = (w & self.mask) as usize;
        let first = frames.min(self.capacity - offset);
        let second = frames - first;
        let ch = self.channels;

        // SAFETY: the SPSC contract gives this thread exclusive access to
        // the free region; the release store below publishes the copied
        // samples before the consumer can observe the new cursor.
        unsafe {
            let data = &mut *self.data.get();
            data[offset * ch..(offset + first) * ch].copy_from_slice(&src[..first * ch]);
            if second > 0 {
                data[..second * ch].copy_from_slice(&src[first * ch..frames * ch]);
            }
        }

        self.write.store(w + frames as u64, Ordering::Release);
        frames
    }

    /// Read up to `frames` interleaved frames into `dst`.
    ///
    /// Clamps to the current occupancy and returns the frames actually
    /// read. Only one thread may ever call this.
    pub fn read_interleaved(&self, dst: &mut [f32], frames: usize) -> usize {
        let frames = frames.min(self.available_to_read());
        if frames == 0 {
            return 0;
        }
        debug_assert!(dst.len() >= frames * self.channels);

        let r = self.read.load(Ordering::Relaxed);
        let offset = (r & self.mask) as usize;
        let first = frames.min(self.capacity - offset);
        let second = frames - first;
        let ch = self.channels;

        // SAFETY: the occupied region is exclusively the consumer's; the
        // producer's release store already published these samples.
        unsafe {
            let data = &*self.data.get();
            dst[..first * ch].copy_from_slice(&data[offset * ch..(offset + first) * ch]);
            if second > 0 {
                dst[first * ch..frames * ch].copy_from_slice(&data[..second * ch]);
            }
        }

        self.read.store(r + frames as u64, Ordering::Release);
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn rejects_zero_dimensions() {
        assert!(RingBuffer::new(0, 2).is_err());
        assert!(RingBuffer::new(128, 0).is_err());
    }

    #[test]
    fn rounds_capacity_to_next_power_of_two() {
        let ring = RingBuffer::new(100, 2).unwrap();
        assert_eq!(ring.capacity_frames(), 128);
        let ring = RingBuffer::new(1, 1).unwrap();
        assert_eq!(ring.capacity_frames(), 2);
    }

    #[test]
    fn oversized_write_truncates_and_fills_ring() {
        let ring = RingBuffer::new(100, 2).unwrap();
        let data = vec![1.0f32; 200 * 2];
        assert_eq!(ring.write_interleaved(&data, 200), 128);
        assert_eq!(ring.available_to_write(), 0);
        assert_eq!(ring.available_to_read(), 128);
    }

    #[test]
    fn available_counts_always_sum_to_capacity() {
        let ring = RingBuffer::new(16, 1).unwrap();
        let mut out = vec![0.0f32; 16];
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        for step in 0..50 {
            let n = (step % 7) + 1;
            ring.write_interleaved(&data, n);
            assert_eq!(ring.available_to_read() + ring.available_to_write(), 16);
            ring.read_interleaved(&mut out, (step % 5) + 1);
            assert_eq!(ring.available_to_read() + ring.available_to_write(), 16);
        }
    }

    #[test]
    fn preserves_frame_order_across_wraparound() {
        let ring = RingBuffer::new(8, 2).unwrap();
        let mut next_write = 0.0f32;
        let mut next_read = 0.0f32;
        let mut out = vec![0.0f32; 6 * 2];
        for _ in 0..100 {
            let chunk: Vec<f32> = (0..5 * 2).map(|i| next_write + i as f32).collect();
            let wrote = ring.write_interleaved(&chunk, 5);
            next_write += (wrote * 2) as f32;

            let got = ring.read_interleaved(&mut out, 6);
            for (i, &sample) in out[..got * 2].iter().enumerate() {
                assert_eq!(sample, next_read + i as f32);
            }
            next_read += (got * 2) as f32;
        }
    }

    #[test]
    fn spsc_data_integrity_across_threads() {
        const TOTAL: usize = 50_000;
        let ring = Arc::new(RingBuffer::new(64, 1).unwrap());

        let producer = {
            let ring = ring.clone();
            std::thread::spawn(move || {
                let mut sent = 0usize;
                while sent < TOTAL {
                    let end = (sent + 17).min(TOTAL);
                    let chunk: Vec<f32> = (sent..end).map(|i| i as f32).collect();
                    let wrote = ring.write_interleaved(&chunk, chunk.len());
                    sent += wrote;
                    if wrote == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut received = 0usize;
        let mut buf = vec![0.0f32; 64];
        while received < TOTAL {
            let cap = buf.len();
            let got = ring.read_interleaved(&mut buf, cap);
            for &sample in &buf[..got] {
                assert_eq!(sample, received as f32);
                received += 1;
            }
            if got == 0 {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
