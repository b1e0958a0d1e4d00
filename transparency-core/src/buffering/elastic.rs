//! `ElasticRingBuffer`: fixed-capacity SPSC store of interleaved f32 frames.
//!
//! ## Cursor model
//!
//! ```text
//!   read_cursor            write_cursor
//!        │                      │
//!   ─────▼──────────────────────▼───────────
//!        │◄── available_read ──►│◄ available_write ►
//! ```
//!
//! Both cursors are monotonically increasing 64-bit frame counts and are
//! interpreted modulo `capacity`. The producer only ever advances
//! `write_cursor`, the consumer only ever advances `read_cursor`; free and
//! occupied space are derived from their difference, so no lock is needed.
//!
//! Samples are stored as `AtomicU32` bit patterns. Sample accesses are
//! `Relaxed`; the `Release` store of a cursor in `commit_*` publishes them
//! to the `Acquire` load on the other side.
//!
//! A region returned by `acquire_*` never crosses the end of the storage.
//! Callers that need more frames than one region grants call `acquire_*`
//! again after committing.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{Result, TransparencyError};

pub struct ElasticRingBuffer {
    storage: Box<[AtomicU32]>,
    capacity: usize,
    channels: usize,
    write_cursor: AtomicU64,
    read_cursor: AtomicU64,
}

impl ElasticRingBuffer {
    /// Allocate storage for `capacity` frames of `channels` samples.
    ///
    /// This is the only allocation the buffer ever performs.
    ///
    /// # Errors
    /// - `Configuration` for a zero capacity or channel count.
    /// - `OutOfMemory` when the storage cannot be reserved.
    pub fn new(capacity: usize, channels: usize) -> Result<Self> {
        if capacity == 0 || channels == 0 {
            return Err(TransparencyError::Configuration(format!(
                "ring buffer needs a non-zero capacity and channel count (got {capacity} x {channels})"
            )));
        }
        let oom = || TransparencyError::OutOfMemory {
            frames: capacity,
            channels,
        };
        let len = capacity.checked_mul(channels).ok_or_else(oom)?;

        let mut storage: Vec<AtomicU32> = Vec::new();
        storage.try_reserve_exact(len).map_err(|_| oom())?;
        storage.extend((0..len).map(|_| AtomicU32::new(0)));

        Ok(Self {
            storage: storage.into_boxed_slice(),
            capacity,
            channels,
            write_cursor: AtomicU64::new(0),
            read_cursor: AtomicU64::new(0),
        })
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames ready to be consumed.
    pub fn available_read(&self) -> usize {
        let write = self.write_cursor.load(Ordering::Acquire);
        let read = self.read_cursor.load(Ordering::Acquire);
        // A concurrent `reset` can briefly leave read ahead of write.
        (write.saturating_sub(read) as usize).min(self.capacity)
    }

    /// Free space in frames.
    pub fn available_write(&self) -> usize {
        self.capacity - self.available_read()
    }

    /// Fill level as a fraction of capacity in `[0.0, 1.0]`.
    pub fn fill_fraction(&self) -> f32 {
        self.available_read() as f32 / self.capacity as f32
    }

    /// Reserve up to `max_frames` of contiguous write space.
    ///
    /// The grant is bounded by free space and by the distance to the end of
    /// the storage. An empty region means the buffer is full.
    pub fn acquire_write(&self, max_frames: usize) -> WriteRegion<'_> {
        let write = self.write_cursor.load(Ordering::Relaxed);
        let offset = self.slot(write);
        let frames = max_frames
            .min(self.available_write())
            .min(self.capacity - offset);
        WriteRegion {
            ring: self,
            offset,
            frames,
        }
    }

    /// Publish `frames` written through the preceding [`acquire_write`].
    ///
    /// [`acquire_write`]: Self::acquire_write
    pub fn commit_write(&self, frames: usize) {
        debug_assert!(
            frames <= self.available_write(),
            "commit_write({frames}) exceeds free space"
        );
        let frames = frames.min(self.available_write()) as u64;
        let write = self.write_cursor.load(Ordering::Relaxed);
        self.write_cursor
            .store(write.wrapping_add(frames), Ordering::Release);
    }

    /// Reserve up to `max_frames` of contiguous readable frames.
    pub fn acquire_read(&self, max_frames: usize) -> ReadRegion<'_> {
        let read = self.read_cursor.load(Ordering::Relaxed);
        let offset = self.slot(read);
        let frames = max_frames
            .min(self.available_read())
            .min(self.capacity - offset);
        ReadRegion {
            ring: self,
            offset,
            frames,
        }
    }

    /// Release `frames` consumed through the preceding [`acquire_read`].
    ///
    /// [`acquire_read`]: Self::acquire_read
    pub fn commit_read(&self, frames: usize) {
        debug_assert!(
            frames <= self.available_read(),
            "commit_read({frames}) exceeds readable frames"
        );
        let frames = frames.min(self.available_read()) as u64;
        let read = self.read_cursor.load(Ordering::Relaxed);
        self.read_cursor
            .store(read.wrapping_add(frames), Ordering::Release);
    }

    /// Logically empty the buffer. Storage contents are left as they are.
    ///
    /// Only valid while neither the producer nor the consumer is active.
    pub fn reset(&self) {
        self.read_cursor.store(0, Ordering::Release);
        self.write_cursor.store(0, Ordering::Release);
    }

    fn slot(&self, cursor: u64) -> usize {
        (cursor % self.capacity as u64) as usize
    }

    fn sample_index(&self, frame_slot: usize, channel: usize) -> usize {
        frame_slot * self.channels + channel
    }
}

impl std::fmt::Debug for ElasticRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticRingBuffer")
            .field("capacity", &self.capacity)
            .field("channels", &self.channels)
            .field("available_read", &self.available_read())
            .finish()
    }
}

/// Contiguous span of writable frames granted by [`ElasticRingBuffer::acquire_write`].
pub struct WriteRegion<'a> {
    ring: &'a ElasticRingBuffer,
    offset: usize,
    frames: usize,
}

impl WriteRegion<'_> {
    /// Number of frames granted.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn write_sample(&self, frame: usize, channel: usize, value: f32) {
        debug_assert!(frame < self.frames && channel < self.ring.channels);
        let idx = self.ring.sample_index(self.offset + frame, channel);
        self.ring.storage[idx].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Copy interleaved samples into the region, multiplying each by `gain`.
    ///
    /// Copies `min(src frames, region frames)` whole frames and returns that count.
    pub fn write_scaled(&self, src: &[f32], gain: f32) -> usize {
        let ch = self.ring.channels;
        let frames = (src.len() / ch).min(self.frames);
        let base = self.ring.sample_index(self.offset, 0);
        let dst = &self.ring.storage[base..base + frames * ch];
        for (slot, sample) in dst.iter().zip(src) {
            slot.store((sample * gain).to_bits(), Ordering::Relaxed);
        }
        frames
    }

    /// Write `value` into every sample of the region.
    pub fn fill(&self, value: f32) {
        let base = self.ring.sample_index(self.offset, 0);
        let len = self.frames * self.ring.channels;
        let bits = value.to_bits();
        for slot in &self.ring.storage[base..base + len] {
            slot.store(bits, Ordering::Relaxed);
        }
    }
}

/// Contiguous span of readable frames granted by [`ElasticRingBuffer::acquire_read`].
pub struct ReadRegion<'a> {
    ring: &'a ElasticRingBuffer,
    offset: usize,
    frames: usize,
}

impl ReadRegion<'_> {
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        debug_assert!(frame < self.frames && channel < self.ring.channels);
        let idx = self.ring.sample_index(self.offset + frame, channel);
        f32::from_bits(self.ring.storage[idx].load(Ordering::Relaxed))
    }

    /// Copy the region into the front of `dst` (interleaved).
    ///
    /// Copies `min(region frames, dst frames)` whole frames and returns that count.
    pub fn copy_to(&self, dst: &mut [f32]) -> usize {
        let ch = self.ring.channels;
        let frames = (dst.len() / ch).min(self.frames);
        let base = self.ring.sample_index(self.offset, 0);
        let src = &self.ring.storage[base..base + frames * ch];
        for (out, slot) in dst.iter_mut().zip(src) {
            *out = f32::from_bits(slot.load(Ordering::Relaxed));
        }
        frames
    }
}
