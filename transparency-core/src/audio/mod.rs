//! Device-layer contract.
//!
//! # Design constraints
//!
//! The engine never talks to hardware directly. An [`AudioBackend`] owns the
//! capture and playback devices and invokes the two callbacks it receives at
//! bind time on its own real-time threads. Inside those callbacks the core
//! **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O (including logging)
//!
//! `CaptureFeeder::process` and `PlaybackDrainer::render` satisfy that
//! contract; backends must not wrap them in anything that doesn't.
//!
//! # Stop contract
//!
//! `AudioBackend::stop` must not return until the device layer guarantees no
//! further invocation of that role's callback. The engine relies on this
//! before it resets or frees the buffers the callbacks touch.

pub mod device;
pub mod synthetic;

#[cfg(feature = "audio-cpal")]
pub mod cpal_backend;

#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalBackend;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::{
    engine::{hooks::EngineHooks, EngineConfig, CaptureFeeder, PlaybackDrainer},
    error::Result,
    ipc::events::{EngineEvent, EngineState, EngineWarning},
};

/// Which side of the bridge a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Capture,
    Playback,
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capture => f.write_str("capture"),
            Self::Playback => f.write_str("playback"),
        }
    }
}

/// Period sizes the bound devices actually run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceTiming {
    pub capture_period_frames: u32,
    pub playback_period_frames: u32,
}

impl DeviceTiming {
    pub fn symmetric(period_frames: u32) -> Self {
        Self {
            capture_period_frames: period_frames,
            playback_period_frames: period_frames,
        }
    }

    /// Period duration of `role` in milliseconds at `sample_rate`.
    pub fn period_ms(&self, role: DeviceRole, sample_rate: u32) -> f32 {
        let frames = match role {
            DeviceRole::Capture => self.capture_period_frames,
            DeviceRole::Playback => self.playback_period_frames,
        };
        frames_to_ms(frames as usize, sample_rate)
    }
}

pub(crate) fn frames_to_ms(frames: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f32 * 1000.0 / sample_rate as f32
}

/// The two callbacks handed to a backend at bind time.
pub struct StreamCallbacks {
    pub capture: CaptureFeeder,
    pub playback: PlaybackDrainer,
}

/// A device notification held back until the current lifecycle call returns.
#[derive(Debug, Clone)]
enum Notice {
    Warning(EngineWarning),
    Disconnected { role: DeviceRole, device_id: String },
}

/// Notices raised while at least one lifecycle call is in flight.
#[derive(Debug, Default)]
struct Deferred {
    depth: usize,
    queue: Vec<Notice>,
}

/// Sink through which a backend reports warnings and disconnections.
///
/// Cheap to clone; safe to call from any thread. While the controller is
/// inside a lifecycle call, notices are queued and only dispatched once its
/// lock has been released, so handlers may call back into the controller.
#[derive(Clone)]
pub struct DeviceEvents {
    hooks: EngineHooks,
    events_tx: broadcast::Sender<EngineEvent>,
    deferred: Arc<Mutex<Deferred>>,
}

impl DeviceEvents {
    pub(crate) fn new(hooks: EngineHooks, events_tx: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            hooks,
            events_tx,
            deferred: Arc::new(Mutex::new(Deferred::default())),
        }
    }

    /// A sink with no handlers and no subscribers.
    pub fn detached() -> Self {
        let (events_tx, _) = broadcast::channel(1);
        Self::new(EngineHooks::default(), events_tx)
    }

    pub fn warn(&self, warning: EngineWarning) {
        warn!(role = %warning.role(), "{warning}");
        self.dispatch(Notice::Warning(warning));
    }

    pub fn disconnected(&self, role: DeviceRole, device_id: &str) {
        warn!(%role, device_id, "audio device disconnected");
        self.dispatch(Notice::Disconnected {
            role,
            device_id: device_id.to_string(),
        });
    }

    /// Start queueing notices. Calls nest; each must be paired with `flush`.
    pub(crate) fn defer(&self) {
        self.deferred.lock().depth += 1;
    }

    /// End one `defer` and, once no call is left in flight, deliver what was
    /// queued in the order it was raised.
    pub(crate) fn flush(&self) {
        let pending = {
            let mut deferred = self.deferred.lock();
            deferred.depth = deferred.depth.saturating_sub(1);
            if deferred.depth > 0 {
                return;
            }
            std::mem::take(&mut deferred.queue)
        };
        for notice in pending {
            self.deliver(notice);
        }
    }

    pub(crate) fn state_changed(&self, state: EngineState) {
        self.hooks.state_changed(state);
        let _ = self.events_tx.send(EngineEvent::StateChanged { state });
    }

    fn dispatch(&self, notice: Notice) {
        {
            let mut deferred = self.deferred.lock();
            if deferred.depth > 0 {
                deferred.queue.push(notice);
                return;
            }
        }
        self.deliver(notice);
    }

    fn deliver(&self, notice: Notice) {
        match notice {
            Notice::Warning(warning) => {
                self.hooks.warning(&warning);
                let _ = self.events_tx.send(EngineEvent::Warning { warning });
            }
            Notice::Disconnected { role, device_id } => {
                self.hooks.device_disconnected(role, &device_id);
                let _ = self
                    .events_tx
                    .send(EngineEvent::DeviceDisconnected { role, device_id });
            }
        }
    }
}

impl std::fmt::Debug for DeviceEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEvents")
            .field("hooks", &self.hooks)
            .field("subscribers", &self.events_tx.receiver_count())
            .field("deferred", &self.deferred.lock().queue.len())
            .finish()
    }
}

/// Injected device I/O capability.
///
/// The engine calls `bind` once per initialize, `start`/`stop` per role in
/// producer/consumer order, and `release` once per uninitialize (or after a
/// failed `bind`).
pub trait AudioBackend: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Open both devices and register the callbacks. Devices stay stopped.
    ///
    /// # Errors
    /// `BackendInit` or `DeviceOpen` when a device cannot be opened. The
    /// backend must not keep any device open when it returns an error.
    fn bind(
        &mut self,
        config: &EngineConfig,
        callbacks: StreamCallbacks,
        events: DeviceEvents,
    ) -> Result<DeviceTiming>;

    /// Begin invoking the callback for `role`.
    fn start(&mut self, role: DeviceRole) -> Result<()>;

    /// Stop invoking the callback for `role`. Synchronous; see module docs.
    fn stop(&mut self, role: DeviceRole) -> Result<()>;

    /// Close both devices and drop the callbacks. Must be idempotent.
    fn release(&mut self);
}
