//! Deterministic in-process backend.
//!
//! `SyntheticBackend` plays the role of the device layer without touching
//! hardware: the callbacks it receives at bind time are driven from the
//! caller's thread through a [`SyntheticDriver`]. Used by the engine's unit
//! and integration tests and by the `drift_sim` binary.
//!
//! Capture and playback callbacks sit behind separate locks so one thread
//! can feed while another drains, as two real devices would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::{AudioBackend, DeviceEvents, DeviceRole, DeviceTiming, StreamCallbacks};
use crate::engine::{CaptureFeeder, EngineConfig, PlaybackDrainer};
use crate::error::{Result, TransparencyError};
use crate::ipc::events::EngineWarning;

const DEFAULT_DEVICE_ID: &str = "synthetic";

/// One recorded call into the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCall {
    Bind,
    Start(DeviceRole),
    Stop(DeviceRole),
    Release,
}

#[derive(Default)]
struct SyntheticShared {
    calls: Mutex<Vec<BackendCall>>,
    capture: Mutex<Option<CaptureFeeder>>,
    playback: Mutex<Option<PlaybackDrainer>>,
    capture_running: AtomicBool,
    playback_running: AtomicBool,
    events: Mutex<Option<DeviceEvents>>,
    device_ids: Mutex<(String, String)>,
}

impl SyntheticShared {
    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }

    fn running_flag(&self, role: DeviceRole) -> &AtomicBool {
        match role {
            DeviceRole::Capture => &self.capture_running,
            DeviceRole::Playback => &self.playback_running,
        }
    }

    /// Clear the running flag while holding that role's callback lock, so no
    /// callback is mid-flight once this returns.
    fn halt(&self, role: DeviceRole) {
        match role {
            DeviceRole::Capture => {
                let _guard = self.capture.lock();
                self.capture_running.store(false, Ordering::Release);
            }
            DeviceRole::Playback => {
                let _guard = self.playback.lock();
                self.playback_running.store(false, Ordering::Release);
            }
        }
    }

    fn device_id(&self, role: DeviceRole) -> String {
        let ids = self.device_ids.lock();
        match role {
            DeviceRole::Capture => ids.0.clone(),
            DeviceRole::Playback => ids.1.clone(),
        }
    }
}

/// Backend half: handed to `EngineController::new`.
pub struct SyntheticBackend {
    shared: Arc<SyntheticShared>,
    timing: Option<DeviceTiming>,
    fail_bind: bool,
    fail_start: Option<DeviceRole>,
    fail_stop: Option<DeviceRole>,
    start_warnings: Vec<EngineWarning>,
}

impl SyntheticBackend {
    /// Create a backend and the driver that feeds it.
    pub fn new() -> (Self, SyntheticDriver) {
        let shared = Arc::new(SyntheticShared::default());
        let backend = Self {
            shared: Arc::clone(&shared),
            timing: None,
            fail_bind: false,
            fail_start: None,
            fail_stop: None,
            start_warnings: Vec::new(),
        };
        (backend, SyntheticDriver { shared })
    }

    /// Report these periods from `bind` instead of the configured one.
    pub fn with_timing(mut self, timing: DeviceTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Make `bind` fail as if the capture device could not be opened.
    pub fn fail_bind(mut self) -> Self {
        self.fail_bind = true;
        self
    }

    pub fn fail_start(mut self, role: DeviceRole) -> Self {
        self.fail_start = Some(role);
        self
    }

    /// Make `stop(role)` report an error after the device has stopped.
    pub fn fail_stop(mut self, role: DeviceRole) -> Self {
        self.fail_stop = Some(role);
        self
    }

    /// Emit `warning` each time the device for `warning.role()` starts.
    pub fn warn_on_start(mut self, warning: EngineWarning) -> Self {
        self.start_warnings.push(warning);
        self
    }
}

impl AudioBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn bind(
        &mut self,
        config: &EngineConfig,
        callbacks: StreamCallbacks,
        events: DeviceEvents,
    ) -> Result<DeviceTiming> {
        self.shared.record(BackendCall::Bind);
        if self.fail_bind {
            return Err(TransparencyError::DeviceOpen {
                role: DeviceRole::Capture,
                message: "synthetic bind failure".into(),
            });
        }

        *self.shared.device_ids.lock() = (
            config
                .input_device_id
                .clone()
                .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
            config
                .output_device_id
                .clone()
                .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
        );
        *self.shared.capture.lock() = Some(callbacks.capture);
        *self.shared.playback.lock() = Some(callbacks.playback);
        *self.shared.events.lock() = Some(events);

        Ok(self
            .timing
            .unwrap_or_else(|| DeviceTiming::symmetric(config.period_frames)))
    }

    fn start(&mut self, role: DeviceRole) -> Result<()> {
        self.shared.record(BackendCall::Start(role));
        if self.fail_start == Some(role) {
            return Err(TransparencyError::DeviceStart {
                role,
                message: "synthetic start failure".into(),
            });
        }
        self.shared.running_flag(role).store(true, Ordering::Release);

        let events = self.shared.events.lock().clone();
        if let Some(events) = events {
            for warning in self.start_warnings.iter().filter(|w| w.role() == role) {
                events.warn(warning.clone());
            }
        }
        Ok(())
    }

    fn stop(&mut self, role: DeviceRole) -> Result<()> {
        self.shared.record(BackendCall::Stop(role));
        self.shared.halt(role);
        if self.fail_stop == Some(role) {
            return Err(TransparencyError::DeviceStop {
                role,
                message: "synthetic stop failure".into(),
            });
        }
        Ok(())
    }

    fn release(&mut self) {
        self.shared.record(BackendCall::Release);
        self.shared.halt(DeviceRole::Capture);
        self.shared.halt(DeviceRole::Playback);
        self.shared.capture.lock().take();
        self.shared.playback.lock().take();
        self.shared.events.lock().take();
    }
}

/// Driver half: stands in for the device threads.
///
/// Cloneable; clones share the same backend.
#[derive(Clone)]
pub struct SyntheticDriver {
    shared: Arc<SyntheticShared>,
}

impl SyntheticDriver {
    /// Deliver one block of interleaved capture samples.
    ///
    /// `None` when the capture device is not running, in which case the
    /// callback is not invoked.
    pub fn push_capture(&self, samples: &[f32]) -> Option<usize> {
        let mut capture = self.shared.capture.lock();
        if !self.shared.capture_running.load(Ordering::Acquire) {
            return None;
        }
        capture.as_mut().map(|feeder| feeder.process(samples))
    }

    /// Request `frames` frames of output.
    ///
    /// `None` when the playback device is not running.
    pub fn pull_playback(&self, frames: usize) -> Option<Vec<f32>> {
        let mut playback = self.shared.playback.lock();
        if !self.shared.playback_running.load(Ordering::Acquire) {
            return None;
        }
        let drainer = playback.as_mut()?;
        let mut out = vec![0.0f32; frames * drainer.channels()];
        drainer.render(&mut out);
        Some(out)
    }

    /// Fill `output` (interleaved) from the playback callback.
    ///
    /// Returns the number of frames that came from the ring.
    pub fn pull_playback_into(&self, output: &mut [f32]) -> Option<usize> {
        let mut playback = self.shared.playback.lock();
        if !self.shared.playback_running.load(Ordering::Acquire) {
            return None;
        }
        playback.as_mut().map(|drainer| drainer.render(output))
    }

    /// Simulate the OS removing the device for `role`.
    ///
    /// The device stops delivering callbacks and a disconnect notification
    /// is raised with the bound device id.
    pub fn disconnect(&self, role: DeviceRole) {
        self.shared.halt(role);
        let events = self.shared.events.lock().clone();
        if let Some(events) = events {
            events.disconnected(role, &self.shared.device_id(role));
        }
    }

    /// Raise `warning` as the device layer would, outside any lifecycle call.
    pub fn emit_warning(&self, warning: EngineWarning) {
        let events = self.shared.events.lock().clone();
        if let Some(events) = events {
            events.warn(warning);
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.shared.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.shared.calls.lock().clear();
    }

    pub fn is_bound(&self) -> bool {
        self.shared.capture.lock().is_some() && self.shared.playback.lock().is_some()
    }

    pub fn is_running(&self, role: DeviceRole) -> bool {
        self.shared.running_flag(role).load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SyntheticDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticDriver")
            .field("bound", &self.is_bound())
            .field("capture_running", &self.is_running(DeviceRole::Capture))
            .field("playback_running", &self.is_running(DeviceRole::Playback))
            .finish()
    }
}
