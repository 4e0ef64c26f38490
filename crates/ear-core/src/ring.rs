//! Single-producer/single-consumer sample ring with drop-oldest overflow.
//!
//! Cursors are monotonic sample positions and are wrapped modulo the
//! capacity only when a slot is touched. The ring keeps `read <= write` and
//! `write - read <= capacity`: when a push would exceed the capacity the
//! producer moves `read` forward itself, so the newest audio always wins.
//!
//! The producer claims overwritten slots (by advancing `read`) before it
//! writes them, and the consumer commits a pop with a compare-exchange on
//! `read`. A pop that raced with an overwrite fails its commit and retries
//! from the new cursor, so it never returns a torn mix of old and new data.
//! Slots are `AtomicU32` bit patterns, so the race is well-defined.

use crate::ChannelMix;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
#[repr(align(64))]
struct Cursor(AtomicU64);

/// Fixed-capacity mono sample queue bridging the audio callback and the
/// analysis thread.
///
/// Exactly one thread may push and exactly one thread may pop at a time.
/// Neither side blocks or allocates after construction.
#[derive(Debug)]
pub struct SampleRing {
    slots: Box<[AtomicU32]>,
    capacity: u64,
    write: Cursor,
    read: Cursor,
    dropped: AtomicU64,
}

impl SampleRing {
    /// Create a ring holding up to `capacity` samples (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            capacity: capacity as u64,
            write: Cursor::default(),
            read: Cursor::default(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Total samples ever queued (monotonic).
    pub fn write_cursor(&self) -> u64 {
        self.write.0.load(Ordering::Acquire)
    }

    /// Total samples ever consumed or dropped (monotonic).
    pub fn read_cursor(&self) -> u64 {
        self.read.0.load(Ordering::Acquire)
    }

    /// Unread samples currently queued.
    pub fn len(&self) -> usize {
        let read = self.read_cursor();
        self.write_cursor().saturating_sub(read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples discarded by overflow since construction.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Down-mix `frames` frames of `channels` to mono and queue them.
    ///
    /// Producer side only. Tolerates zero frames, zero channels and channels
    /// shorter than `frames` (the block is truncated to the shortest used
    /// channel). Returns the number of samples dropped to make room.
    pub fn push(&self, channels: &[&[f32]], frames: usize, mix: ChannelMix) -> usize {
        let frames = mix.readable_frames(channels, frames);
        self.push_with(frames, |i| mix.sample(channels, i))
    }

    /// Queue already-mono samples. Producer side only.
    pub fn push_mono(&self, samples: &[f32]) -> usize {
        self.push_with(samples.len(), |i| samples[i])
    }

    fn push_with(&self, frames: usize, sample_at: impl Fn(usize) -> f32) -> usize {
        if frames == 0 {
            return 0;
        }

        let cap = self.capacity;
        // A block larger than the ring keeps only its newest `cap` samples.
        let count = (frames as u64).min(cap);
        let skipped = frames as u64 - count;
        let first = frames - count as usize;

        let write = self.write.0.load(Ordering::Relaxed);
        let end = write + count;
        let floor = end.saturating_sub(cap);

        let mut overwritten = 0;
        let mut read = self.read.0.load(Ordering::Acquire);
        while read < floor {
            match self.read.0.compare_exchange_weak(
                read,
                floor,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    overwritten = floor - read;
                    break;
                }
                Err(actual) => read = actual,
            }
        }

        for i in 0..count {
            let slot = ((write + i) % cap) as usize;
            let sample = sample_at(first + i as usize);
            self.slots[slot].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.write.0.store(end, Ordering::Release);

        let dropped = overwritten + skipped;
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
        dropped as usize
    }

    /// Move up to `out.len()` of the oldest unread samples into `out`.
    ///
    /// Consumer side only. Returns how many samples were written, possibly 0.
    pub fn pop(&self, out: &mut [f32]) -> usize {
        let cap = self.capacity;
        loop {
            let read = self.read.0.load(Ordering::Acquire);
            let write = self.write.0.load(Ordering::Acquire);
            let n = write.saturating_sub(read).min(out.len() as u64);
            if n == 0 {
                return 0;
            }

            for (i, dst) in out[..n as usize].iter_mut().enumerate() {
                let slot = ((read + i as u64) % cap) as usize;
                *dst = f32::from_bits(self.slots[slot].load(Ordering::Relaxed));
            }

            if self
                .read
                .0
                .compare_exchange(read, read + n, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return n as usize;
            }
            // The producer overwrote part of what we copied; retry from the
            // advanced cursor.
        }
    }

    /// Discard every unread sample. Consumer side only.
    pub fn clear(&self) {
        let write = self.write.0.load(Ordering::Acquire);
        self.read.0.fetch_max(write, Ordering::AcqRel);
    }
}
