//! Playback side: ring buffer → hardware output, with drift compensation.
//!
//! ## Drift policy (evaluated once per callback, before reading)
//!
//! ```text
//!  fill%   0 ──────── 25 ─────────────── 75 ──────── 100
//!          │ stretch  │    pass through   │ compress │
//! ```
//!
//! - **Stretch**: below 25 % and fewer frames than requested. Count an
//!   underrun, read what exists and repeat the last frame for the rest.
//! - **Compress**: above 75 % and more than `frames + 1` available. Discard
//!   exactly one frame before reading.
//! - **Pass**: read `frames` as requested.
//!
//! One frame per callback bounds the audible effect to a single inserted or
//! dropped sample; each correction moves the fill back toward the band.

use std::sync::Arc;

use crate::buffering::StreamBuffers;
use crate::buffering::MAX_CHANNELS;
use crate::engine::shared::EngineShared;

/// Lower edge of the pass-through band, in percent of capacity.
pub const LOW_WATER_PERCENT: usize = 25;
/// Upper edge of the pass-through band, in percent of capacity.
pub const HIGH_WATER_PERCENT: usize = 75;

/// Outcome of the drift check for one playback callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftDecision {
    /// Nothing to read: repeat the cached frame for the whole block.
    Starved,
    /// Read the `available` frames that exist and pad the remainder.
    Stretch { available: usize },
    /// Discard one frame, then read the full block.
    Compress,
    /// Read the full block.
    Pass,
}

impl DriftDecision {
    /// Decide how to serve a request for `requested` frames when `available`
    /// frames are buffered in a ring of `capacity` frames.
    pub fn evaluate(available: usize, capacity: usize, requested: usize) -> Self {
        let fill_percent = available * 100 / capacity;
        if fill_percent < LOW_WATER_PERCENT && available < requested {
            if available == 0 {
                Self::Starved
            } else {
                Self::Stretch { available }
            }
        } else if fill_percent > HIGH_WATER_PERCENT && available > requested + 1 {
            Self::Compress
        } else {
            Self::Pass
        }
    }

    /// Whether this decision inserts or removes a frame.
    pub fn is_correction(self) -> bool {
        !matches!(self, Self::Pass)
    }
}

pub struct PlaybackDrainer {
    shared: Arc<EngineShared>,
    buffers: Arc<StreamBuffers>,
}

impl PlaybackDrainer {
    pub fn new(shared: Arc<EngineShared>, buffers: Arc<StreamBuffers>) -> Self {
        Self { shared, buffers }
    }

    /// Interleaved channel count `render` expects.
    pub fn channels(&self) -> usize {
        self.buffers.ring.channels()
    }

    /// Fill `output` (interleaved) completely.
    ///
    /// Returns the number of frames that came from the ring; the rest of
    /// the block is silence (not running) or repeated cached frames.
    pub fn render(&mut self, output: &mut [f32]) -> usize {
        if !self.shared.state.is_running() {
            output.fill(0.0);
            return 0;
        }

        let ring = &self.buffers.ring;
        let counters = &self.shared.counters;
        let ch = ring.channels();
        let requested = output.len() / ch;

        let decision = DriftDecision::evaluate(ring.available_read(), ring.capacity(), requested);
        if decision.is_correction() {
            counters.record_drift_correction();
        }

        let frames_to_read = match decision {
            DriftDecision::Starved => {
                counters.record_underrun();
                self.pad_from_cache(output, 0);
                return 0;
            }
            DriftDecision::Stretch { available } => {
                counters.record_underrun();
                available
            }
            DriftDecision::Compress => {
                // The discarded frame does not refresh the last-frame cache.
                let region = ring.acquire_read(1);
                let skipped = region.frames();
                ring.commit_read(skipped);
                requested
            }
            DriftDecision::Pass => requested,
        };

        let mut copied = 0;
        while copied < frames_to_read {
            let region = ring.acquire_read(frames_to_read - copied);
            if region.is_empty() {
                break;
            }
            let n = region.copy_to(&mut output[copied * ch..requested * ch]);
            ring.commit_read(n);
            copied += n;
        }

        if copied > 0 {
            self.buffers
                .last_frame
                .store(&output[(copied - 1) * ch..copied * ch]);
        }
        if copied < requested {
            self.pad_from_cache(output, copied);
        }
        copied
    }

    /// Overwrite every frame from `from_frame` onward with the cached frame.
    fn pad_from_cache(&self, output: &mut [f32], from_frame: usize) {
        let ch = self.buffers.ring.channels();
        let mut frame = [0.0f32; MAX_CHANNELS];
        let frame = &mut frame[..ch];
        self.buffers.last_frame.load_into(frame);
        for out in output[from_frame * ch..].chunks_mut(ch) {
            out.copy_from_slice(&frame[..out.len()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::events::EngineState;

    fn running_drainer(
        capacity: usize,
        channels: usize,
    ) -> (PlaybackDrainer, Arc<EngineShared>, Arc<StreamBuffers>) {
        let shared = Arc::new(EngineShared::new(1.0));
        shared.state.store(EngineState::Running);
        let buffers = Arc::new(StreamBuffers::allocate(capacity, channels).unwrap());
        let drainer = PlaybackDrainer::new(Arc::clone(&shared), Arc::clone(&buffers));
        (drainer, shared, buffers)
    }

    fn push(buffers: &StreamBuffers, samples: &[f32]) {
        let ring = &buffers.ring;
        let ch = ring.channels();
        let mut written = 0;
        while written * ch < samples.len() {
            let region = ring.acquire_write(samples.len() / ch - written);
            let n = region.write_scaled(&samples[written * ch..], 1.0);
            ring.commit_write(n);
            written += n;
        }
    }

    #[test]
    fn decision_table() {
        // capacity 100 keeps percentages readable
        assert_eq!(DriftDecision::evaluate(0, 100, 4), DriftDecision::Starved);
        assert_eq!(
            DriftDecision::evaluate(3, 100, 4),
            DriftDecision::Stretch { available: 3 }
        );
        // low fill but enough frames for the request
        assert_eq!(DriftDecision::evaluate(10, 100, 4), DriftDecision::Pass);
        // exactly 75 % is inside the band
        assert_eq!(DriftDecision::evaluate(75, 100, 4), DriftDecision::Pass);
        assert_eq!(DriftDecision::evaluate(76, 100, 4), DriftDecision::Compress);
        // high fill but not more than requested + 1
        assert_eq!(DriftDecision::evaluate(80, 100, 79), DriftDecision::Pass);
        assert_eq!(DriftDecision::evaluate(80, 100, 78), DriftDecision::Compress);
        assert!(!DriftDecision::Pass.is_correction());
        assert!(DriftDecision::Compress.is_correction());
    }

    #[test]
    fn outputs_silence_when_not_running() {
        let (mut drainer, shared, buffers) = running_drainer(8, 2);
        push(&buffers, &[0.7; 8]);
        shared.state.store(EngineState::Initialized);

        let mut out = [1.0f32; 6];
        assert_eq!(drainer.render(&mut out), 0);
        assert_eq!(out, [0.0; 6]);
        assert_eq!(buffers.ring.available_read(), 4, "ring must not be touched");
        assert_eq!(shared.counters.snapshot().underruns, 0);
    }

    #[test]
    fn starved_buffer_repeats_cached_frame() {
        let (mut drainer, shared, buffers) = running_drainer(8, 1);
        buffers.last_frame.store(&[0.5]);

        let mut out = [0.0f32; 4];
        assert_eq!(drainer.render(&mut out), 0);
        assert_eq!(out, [0.5; 4]);

        let counters = shared.counters.snapshot();
        assert_eq!(counters.underruns, 1);
        assert_eq!(counters.drift_corrections, 1);
    }

    #[test]
    fn starved_buffer_without_cache_is_silent() {
        let (mut drainer, _shared, _buffers) = running_drainer(8, 2);
        let mut out = [0.3f32; 4];
        drainer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn stretch_reads_what_exists_and_pads_with_last_read_frame() {
        let (mut drainer, shared, buffers) = running_drainer(16, 2);
        push(&buffers, &[0.1, -0.1, 0.2, -0.2]);

        let mut out = [0.0f32; 8];
        assert_eq!(drainer.render(&mut out), 2);
        assert_eq!(out, [0.1, -0.1, 0.2, -0.2, 0.2, -0.2, 0.2, -0.2]);

        let counters = shared.counters.snapshot();
        assert_eq!(counters.underruns, 1);
        assert_eq!(counters.drift_corrections, 1);
        assert_eq!(buffers.ring.available_read(), 0);
    }

    #[test]
    fn compress_discards_exactly_one_frame() {
        let (mut drainer, shared, buffers) = running_drainer(8, 1);
        push(&buffers, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        // 7/8 = 87 % with 7 > 2 + 1 available
        let mut out = [0.0f32; 2];
        assert_eq!(drainer.render(&mut out), 2);
        assert_eq!(out, [2.0, 3.0]);

        let counters = shared.counters.snapshot();
        assert_eq!(counters.drift_corrections, 1);
        assert_eq!(counters.underruns, 0);
        assert_eq!(counters.overruns, 0);
        assert_eq!(buffers.ring.available_read(), 4);
    }

    #[test]
    fn compress_does_not_refresh_cache_from_discarded_frame() {
        let (mut drainer, shared, buffers) = running_drainer(8, 1);
        push(&buffers, &[9.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        buffers.last_frame.store(&[0.25]);

        // A zero-length request still triggers the high-fill discard.
        assert_eq!(drainer.render(&mut []), 0);
        assert_eq!(buffers.ring.available_read(), 6);
        assert_eq!(shared.counters.snapshot().drift_corrections, 1);

        let mut cached = [0.0f32; 1];
        buffers.last_frame.load_into(&mut cached);
        assert_eq!(cached, [0.25]);
    }

    #[test]
    fn pass_through_reads_across_the_wrap() {
        let (mut drainer, shared, buffers) = running_drainer(8, 1);
        push(&buffers, &[0.0; 6]);
        let mut scratch = [0.0f32; 6];
        drainer.render(&mut scratch);

        push(&buffers, &[1.0, 2.0, 3.0, 4.0]);
        let mut out = [0.0f32; 3];
        assert_eq!(drainer.render(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(shared.counters.snapshot().drift_corrections, 0);
    }

    #[test]
    fn mid_band_shortfall_pads_without_counting_underrun() {
        // 3/8 = 37 %: inside the band, but the request is larger than the fill
        let (mut drainer, shared, buffers) = running_drainer(8, 1);
        push(&buffers, &[0.4, 0.5, 0.6]);

        let mut out = [0.0f32; 5];
        assert_eq!(drainer.render(&mut out), 3);
        assert_eq!(out, [0.4, 0.5, 0.6, 0.6, 0.6]);
        assert_eq!(shared.counters.snapshot().underruns, 0);
    }
}
