//! Last-frame cache used to paper over underflow.
//!
//! Written by the capture side (last frame written) and the playback side
//! (last frame read); read by the playback side when the ring runs dry.
//! Values are stored as f32 bit patterns in `AtomicU32` so both audio
//! threads can touch it without a lock. A stale value only affects what an
//! underflow repeats, never buffer integrity, so all accesses are `Relaxed`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug)]
pub struct LastFrameCache {
    samples: Box<[AtomicU32]>,
    valid: AtomicBool,
}

impl LastFrameCache {
    pub fn new(channels: usize) -> Self {
        Self {
            samples: (0..channels).map(|_| AtomicU32::new(0)).collect(),
            valid: AtomicBool::new(false),
        }
    }

    /// Store one interleaved frame. Extra input samples are ignored.
    pub fn store(&self, frame: &[f32]) {
        for (slot, sample) in self.samples.iter().zip(frame) {
            slot.store(sample.to_bits(), Ordering::Relaxed);
        }
        self.valid.store(true, Ordering::Relaxed);
    }

    /// Copy the cached frame into `dst`, or silence when nothing is cached.
    pub fn load_into(&self, dst: &mut [f32]) {
        if !self.is_valid() {
            dst.fill(0.0);
            return;
        }
        for (out, slot) in dst.iter_mut().zip(self.samples.iter()) {
            *out = f32::from_bits(slot.load(Ordering::Relaxed));
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.valid.store(false, Ordering::Relaxed);
        for slot in self.samples.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_yields_silence() {
        let cache = LastFrameCache::new(2);
        let mut out = [9.0f32; 2];
        cache.load_into(&mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert!(!cache.is_valid());
    }

    #[test]
    fn stores_and_clears_a_frame() {
        let cache = LastFrameCache::new(2);
        cache.store(&[0.25, -0.75]);

        let mut out = [0.0f32; 2];
        cache.load_into(&mut out);
        assert_eq!(out, [0.25, -0.75]);

        cache.clear();
        cache.load_into(&mut out);
        assert_eq!(out, [0.0, 0.0]);
    }
}
