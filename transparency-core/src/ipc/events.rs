//! Status and notification types exposed to the control plane.
//!
//! Everything here is `Serialize`/`Deserialize` with camelCase fields so a
//! host can forward it over whatever IPC it uses unchanged.

use serde::{Deserialize, Serialize};

use crate::audio::DeviceRole;
use crate::error::ErrorCode;

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// Lifecycle state of an `EngineController`.
///
/// `Idle → Initialized → Running → Initialized → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EngineState {
    /// No buffers allocated, no devices bound.
    Idle = 0,
    /// Buffers allocated and devices bound, not streaming.
    Initialized = 1,
    /// Both callback sources started.
    Running = 2,
}

impl EngineState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            2 => Self::Running,
            1 => Self::Initialized,
            _ => Self::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view returned by `EngineController::status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub state: EngineState,
    pub running: bool,
    pub volume: f32,
    pub underrun_count: u64,
    pub overrun_count: u64,
    pub drift_correction_count: u64,
    /// Ring buffer fill in `[0.0, 1.0]`.
    pub buffer_fill: f32,
    /// Ring fill time plus capture and playback period time.
    pub latency_ms: f32,
    pub capture_latency_ms: f32,
    pub playback_latency_ms: f32,
    pub last_error: Option<ErrorCode>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Non-fatal conditions reported while binding or starting devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EngineWarning {
    /// The device layer could not raise its callback thread priority. Only
    /// backends that control their own threads report this.
    PriorityNotElevated { role: DeviceRole },
    /// Exclusive share mode was requested but the device is shared.
    ExclusiveModeUnavailable { role: DeviceRole },
    /// The requested period was rejected; the device default is in use.
    #[serde(rename_all = "camelCase")]
    PeriodSizeIgnored {
        role: DeviceRole,
        requested_frames: u32,
    },
    /// The configured device id was not found; the system default is in use.
    #[serde(rename_all = "camelCase")]
    DeviceFallback { role: DeviceRole, requested_id: String },
    /// The backend reported a stream error that did not stop the stream.
    StreamFault { role: DeviceRole, message: String },
}

impl EngineWarning {
    pub fn role(&self) -> DeviceRole {
        match self {
            Self::PriorityNotElevated { role }
            | Self::ExclusiveModeUnavailable { role }
            | Self::PeriodSizeIgnored { role, .. }
            | Self::DeviceFallback { role, .. }
            | Self::StreamFault { role, .. } => *role,
        }
    }
}

impl std::fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriorityNotElevated { role } => {
                write!(f, "{role} thread priority could not be elevated")
            }
            Self::ExclusiveModeUnavailable { role } => {
                write!(f, "{role} device does not support exclusive mode; using shared")
            }
            Self::PeriodSizeIgnored {
                role,
                requested_frames,
            } => write!(
                f,
                "{role} device rejected a {requested_frames}-frame period; using device default"
            ),
            Self::DeviceFallback { role, requested_id } => write!(
                f,
                "{role} device '{requested_id}' not found; using system default"
            ),
            Self::StreamFault { role, message } => write!(f, "{role} stream fault: {message}"),
        }
    }
}

/// Published on the engine event channel for every notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    StateChanged { state: EngineState },
    Warning { warning: EngineWarning },
    #[serde(rename_all = "camelCase")]
    DeviceDisconnected { role: DeviceRole, device_id: String },
}
