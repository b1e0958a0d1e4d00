//! # transparency-core
//!
//! Real-time audio pass-through engine: captured input is played back on an
//! output device with minimal latency, a software volume control, and
//! drift compensation between the two device clocks.
//!
//! ## Architecture
//!
//! ```text
//! capture device ─► CaptureFeeder ─► ElasticRingBuffer ─► PlaybackDrainer ─► playback device
//!  (RT thread)       × volume          (lock-free SPSC)     stretch/compress    (RT thread)
//!                        │                                       │
//!                        └──────► LastFrameCache ◄───────────────┘
//!
//! control plane: EngineController ─ initialize / start / stop / uninitialize
//!                                 ─ set_volume / status / subscribe_events
//! ```
//!
//! Both callbacks are allocation-free, lock-free and never log. All heap
//! work and all tracing happen on the control plane.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;

// Convenience re-exports for downstream crates
pub use audio::device::{list_capture_devices, list_playback_devices, DeviceInfo};
pub use audio::synthetic::{SyntheticBackend, SyntheticDriver};
pub use audio::{AudioBackend, DeviceRole};
pub use engine::{
    EngineConfig, EngineController, EngineHooks, PerformanceProfile, ShareMode,
};
pub use error::{ErrorCode, LastError, TransparencyError};
pub use ipc::events::{EngineEvent, EngineState, EngineStatus, EngineWarning};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalBackend;
