//! Lock-free SPSC buffering between the capture and playback callbacks.
//!
//! `ElasticRingBuffer` exposes an acquire/commit contract so the callbacks
//! can copy straight into and out of storage without intermediate buffers.

pub mod elastic;
pub mod frame_cache;

pub use elastic::{ElasticRingBuffer, ReadRegion, WriteRegion};
pub use frame_cache::LastFrameCache;

use crate::error::{Result, TransparencyError};

/// Ring capacity used when the configuration does not specify one:
/// 2048 frames ≈ 42.7 ms at 48 kHz.
pub const DEFAULT_RING_CAPACITY: usize = 2048;

/// Most interleaved channels a session may carry. The callbacks stage one
/// frame on the stack, so this bounds that scratch space.
pub const MAX_CHANNELS: usize = 32;

/// Storage shared by the capture and playback callbacks for one
/// initialized engine session.
///
/// Allocated at initialize, reset at every start, dropped at uninitialize.
#[derive(Debug)]
pub struct StreamBuffers {
    pub ring: ElasticRingBuffer,
    pub last_frame: LastFrameCache,
}

impl StreamBuffers {
    /// # Errors
    /// - `Configuration` for more than [`MAX_CHANNELS`] channels, or any
    ///   error from [`ElasticRingBuffer::new`].
    pub fn allocate(capacity: usize, channels: usize) -> Result<Self> {
        if channels > MAX_CHANNELS {
            return Err(TransparencyError::Configuration(format!(
                "{channels} channels exceeds the limit of {MAX_CHANNELS}"
            )));
        }
        Ok(Self {
            ring: ElasticRingBuffer::new(capacity, channels)?,
            last_frame: LastFrameCache::new(channels),
        })
    }

    /// Empty the ring, forget the cached frame, then queue `frames` of
    /// silence so playback has headroom before capture delivers anything.
    ///
    /// Returns the number of silent frames actually queued.
    pub fn reset_with_silence(&self, frames: usize) -> usize {
        self.ring.reset();
        self.last_frame.clear();

        let mut queued = 0;
        while queued < frames {
            let region = self.ring.acquire_write(frames - queued);
            if region.is_empty() {
                break;
            }
            region.fill(0.0);
            let n = region.frames();
            self.ring.commit_write(n);
            queued += n;
        }
        queued
    }
}
