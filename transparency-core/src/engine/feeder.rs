//! Capture side: hardware input → gain → ring buffer.
//!
//! `CaptureFeeder::process` runs on the device layer's capture thread. It
//! must not allocate, block, or log; overflow is only counted.

use std::sync::Arc;

use crate::buffering::{StreamBuffers, MAX_CHANNELS};
use crate::engine::shared::EngineShared;

pub struct CaptureFeeder {
    shared: Arc<EngineShared>,
    buffers: Arc<StreamBuffers>,
}

impl CaptureFeeder {
    pub fn new(shared: Arc<EngineShared>, buffers: Arc<StreamBuffers>) -> Self {
        Self { shared, buffers }
    }

    /// Push one block of interleaved captured frames.
    ///
    /// Frames that do not fit are dropped from the tail of the block and
    /// counted as a single overrun. Returns the number of frames written.
    pub fn process(&mut self, input: &[f32]) -> usize {
        if !self.shared.state.is_running() {
            return 0;
        }

        let ring = &self.buffers.ring;
        let ch = ring.channels();
        let mut want = input.len() / ch;
        let have = ring.available_write();
        if want > have {
            self.shared.counters.record_overrun();
            want = have;
        }

        let volume = self.shared.volume.get();
        let mut written = 0;
        while written < want {
            let region = ring.acquire_write(want - written);
            if region.is_empty() {
                break;
            }
            let n = region.write_scaled(&input[written * ch..want * ch], volume);
            ring.commit_write(n);
            written += n;
        }

        if written > 0 {
            let last = &input[(written - 1) * ch..written * ch];
            let mut frame = [0.0f32; MAX_CHANNELS];
            let frame = &mut frame[..ch];
            for (out, sample) in frame.iter_mut().zip(last) {
                *out = sample * volume;
            }
            self.buffers.last_frame.store(frame);
        }

        written
    }
}
