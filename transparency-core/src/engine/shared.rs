//! State shared between the control plane and the two audio callbacks.
//!
//! Everything here is a plain atomic: the callbacks read state and volume
//! and bump counters; the control plane writes state and volume and reads
//! counters. Volume and counters are diagnostic or gain-only, so `Relaxed`
//! is enough; state transitions use `Release`/`Acquire` so a callback that
//! observes `Running` also observes the buffer reset that preceded it.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::ipc::events::EngineState;

pub struct AtomicEngineState(AtomicU8);

impl AtomicEngineState {
    pub fn new(state: EngineState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: EngineState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.load() == EngineState::Running
    }
}

/// Gain scalar in `[0.0, 1.0]` stored as f32 bits.
pub struct VolumeControl(AtomicU32);

impl VolumeControl {
    pub fn new(volume: f32) -> Self {
        Self(AtomicU32::new(clamp_volume(volume).to_bits()))
    }

    /// Store `volume` clamped to `[0.0, 1.0]`; NaN is treated as silence.
    /// Returns the value actually stored.
    pub fn set(&self, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        self.0.store(volume.to_bits(), Ordering::Relaxed);
        volume
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// Stream-health counters. Reset at every start.
#[derive(Default)]
pub struct StreamCounters {
    pub underruns: AtomicU64,
    pub overruns: AtomicU64,
    pub drift_corrections: AtomicU64,
}

impl StreamCounters {
    pub fn reset(&self) {
        self.underruns.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.drift_corrections.store(0, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drift_correction(&self) {
        self.drift_corrections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            drift_corrections: self.drift_corrections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub underruns: u64,
    pub overruns: u64,
    pub drift_corrections: u64,
}

/// Control state that outlives any single initialize/uninitialize cycle.
pub struct EngineShared {
    pub state: AtomicEngineState,
    pub volume: VolumeControl,
    pub counters: StreamCounters,
}

impl EngineShared {
    pub fn new(volume: f32) -> Self {
        Self {
            state: AtomicEngineState::new(EngineState::Idle),
            volume: VolumeControl::new(volume),
            counters: StreamCounters::default(),
        }
    }
}

impl Default for EngineShared {
    fn default() -> Self {
        Self::new(1.0)
    }
}
