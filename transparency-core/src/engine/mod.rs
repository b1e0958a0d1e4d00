//! `EngineController`: lifecycle owner of the capture → playback bridge.
//!
//! ## Lifecycle
//!
//! ```text
//! EngineController::new(backend)
//!     └─► initialize(config)  → ring allocated, devices bound   Idle → Initialized
//!         └─► start()         → ring reset + half-filled with
//!                               silence, capture then playback  Initialized → Running
//!             └─► stop()      → playback then capture stopped   Running → Initialized
//!         └─► uninitialize()  → devices released, ring freed    Initialized → Idle
//! ```
//!
//! `start()` while running, `stop()` while initialized and `uninitialize()`
//! while idle are no-ops that succeed.
//!
//! ## Threading
//!
//! Lifecycle calls are serialised by a `parking_lot::Mutex` around the
//! backend and never run on an audio thread. The callbacks only see
//! [`EngineShared`] (atomics) and [`StreamBuffers`] (lock-free ring).
//! `status`, `config` and the volume accessors read the current session
//! through a separate lock that is never held across a backend call, so they
//! return promptly even while a device is being opened or closed.
//!
//! Device notifications raised during a lifecycle call are queued and
//! delivered after the backend lock is released, together with the state
//! change. Handlers may therefore call back into the controller.
//! `EngineController` is `Send + Sync`; wrap it in an `Arc` to share it.

pub mod config;
pub mod drainer;
pub mod feeder;
pub mod hooks;
pub mod shared;

pub use config::{EngineConfig, PerformanceProfile, ShareMode};
pub use drainer::{DriftDecision, PlaybackDrainer};
pub use feeder::CaptureFeeder;
pub use hooks::EngineHooks;
pub use shared::{CounterSnapshot, EngineShared};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::{frames_to_ms, AudioBackend, DeviceEvents, DeviceRole, DeviceTiming, StreamCallbacks},
    buffering::StreamBuffers,
    error::{LastError, Result, TransparencyError},
    ipc::events::{EngineEvent, EngineState, EngineStatus},
};

/// Broadcast channel capacity: 64 notifications buffered for slow consumers.
const EVENT_CHANNEL_CAP: usize = 64;

struct Session {
    config: EngineConfig,
    buffers: Arc<StreamBuffers>,
    timing: DeviceTiming,
}

/// The top-level engine handle. One instance per bridged device pair.
pub struct EngineController {
    backend: Mutex<Box<dyn AudioBackend>>,
    session: Mutex<Option<Arc<Session>>>,
    shared: Arc<EngineShared>,
    events: DeviceEvents,
    events_tx: broadcast::Sender<EngineEvent>,
    last_error: Mutex<Option<LastError>>,
}

impl EngineController {
    /// Create an idle engine driving `backend`. Nothing is allocated or
    /// opened until `initialize`.
    pub fn new(backend: impl AudioBackend + 'static) -> Self {
        Self::with_hooks(backend, EngineHooks::default())
    }

    pub fn with_hooks(backend: impl AudioBackend + 'static, hooks: EngineHooks) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAP);
        Self {
            backend: Mutex::new(Box::new(backend)),
            session: Mutex::new(None),
            shared: Arc::new(EngineShared::default()),
            events: DeviceEvents::new(hooks, events_tx.clone()),
            events_tx,
            last_error: Mutex::new(None),
        }
    }

    /// Allocate the ring buffer and bind both devices.
    ///
    /// On any failure everything allocated so far is released and the
    /// engine stays `Idle`.
    ///
    /// # Errors
    /// - `AlreadyInitialized` unless idle.
    /// - `Configuration` if `config` fails validation.
    /// - `OutOfMemory` if the ring cannot be allocated.
    /// - Backend errors from `AudioBackend::bind`.
    pub fn initialize(&self, config: EngineConfig) -> Result<()> {
        self.lifecycle(|backend| self.initialize_locked(backend, config))
    }

    /// Reset the ring, pre-fill it with silence, then start capture before
    /// playback.
    ///
    /// # Errors
    /// - `NotInitialized` when idle.
    /// - Backend start errors; the engine stays `Initialized` with both
    ///   devices stopped.
    pub fn start(&self) -> Result<()> {
        self.lifecycle(|backend| self.start_locked(backend))
    }

    /// Stop playback before capture and return to `Initialized`.
    ///
    /// The engine is `Initialized` afterwards even if a device reported a
    /// stop error; the first such error is returned.
    ///
    /// # Errors
    /// - `NotInitialized` when idle.
    /// - Backend stop errors.
    pub fn stop(&self) -> Result<()> {
        self.lifecycle(|backend| self.stop_locked(backend))
    }

    /// Stop if running, release both devices and free the ring.
    pub fn uninitialize(&self) -> Result<()> {
        if self.state() == EngineState::Running {
            if let Err(e) = self.stop() {
                warn!("stop during uninitialize failed: {e}");
            }
        }

        self.lifecycle(|backend| self.uninitialize_locked(backend))
    }

    /// Set the capture gain. Clamped to `[0.0, 1.0]`; returns the stored value.
    pub fn set_volume(&self, volume: f32) -> f32 {
        self.shared.volume.set(volume)
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume.get()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.is_running()
    }

    /// Stream-health counters since the last `start`.
    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// The most recent failed lifecycle call, cleared by the next success.
    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.lock().clone()
    }

    /// Configuration of the current session, if initialized.
    pub fn config(&self) -> Option<EngineConfig> {
        self.session.lock().as_ref().map(|s| s.config.clone())
    }

    /// Snapshot of state, volume, counters, fill and latency.
    pub fn status(&self) -> EngineStatus {
        let session = self.session.lock().clone();
        let state = self.shared.state.load();
        let counters = self.shared.counters.snapshot();

        let (buffer_fill, fill_ms, capture_latency_ms, playback_latency_ms) =
            match &session {
                Some(session) => {
                    let rate = session.config.sample_rate;
                    let ring = &session.buffers.ring;
                    (
                        ring.fill_fraction(),
                        frames_to_ms(ring.available_read(), rate),
                        session.timing.period_ms(DeviceRole::Capture, rate),
                        session.timing.period_ms(DeviceRole::Playback, rate),
                    )
                }
                None => (0.0, 0.0, 0.0, 0.0),
            };

        EngineStatus {
            state,
            running: state == EngineState::Running,
            volume: self.shared.volume.get(),
            underrun_count: counters.underruns,
            overrun_count: counters.overruns,
            drift_correction_count: counters.drift_corrections,
            buffer_fill,
            latency_ms: fill_ms + capture_latency_ms + playback_latency_ms,
            capture_latency_ms,
            playback_latency_ms,
            last_error: self.last_error.lock().as_ref().map(|e| e.code),
        }
    }

    /// Subscribe to state, warning and disconnect notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Run one lifecycle step under the backend lock, then notify and record
    /// the outcome once the lock is released.
    fn lifecycle(&self, step: impl FnOnce(&mut dyn AudioBackend) -> Result<()>) -> Result<()> {
        self.events.defer();
        let (before, result) = {
            let mut backend = self.backend.lock();
            let before = self.shared.state.load();
            (before, step(&mut **backend))
        };
        self.finish(before, result)
    }

    fn initialize_locked(&self, backend: &mut dyn AudioBackend, config: EngineConfig) -> Result<()> {
        if self.shared.state.load() != EngineState::Idle {
            return Err(TransparencyError::AlreadyInitialized);
        }
        config.validate()?;

        let capacity = config.ring_capacity();
        let channels = usize::from(config.channels);
        let buffers = Arc::new(StreamBuffers::allocate(capacity, channels)?);

        let callbacks = StreamCallbacks {
            capture: CaptureFeeder::new(Arc::clone(&self.shared), Arc::clone(&buffers)),
            playback: PlaybackDrainer::new(Arc::clone(&self.shared), Arc::clone(&buffers)),
        };

        let timing = match backend.bind(&config, callbacks, self.events.clone()) {
            Ok(timing) => timing,
            Err(e) => {
                warn!(backend = backend.name(), "device bind failed, rolling back: {e}");
                backend.release();
                return Err(e);
            }
        };

        self.shared.volume.set(config.volume);
        self.shared.counters.reset();

        info!(
            backend = backend.name(),
            sample_rate = config.sample_rate,
            channels,
            capacity,
            capture_period = timing.capture_period_frames,
            playback_period = timing.playback_period_frames,
            "engine initialized"
        );

        *self.session.lock() = Some(Arc::new(Session {
            config,
            buffers,
            timing,
        }));
        self.shared.state.store(EngineState::Initialized);
        Ok(())
    }

    fn start_locked(&self, backend: &mut dyn AudioBackend) -> Result<()> {
        match self.shared.state.load() {
            EngineState::Running => return Ok(()),
            EngineState::Idle => return Err(TransparencyError::NotInitialized),
            EngineState::Initialized => {}
        }
        let (buffers, target_fill) = match self.session.lock().as_deref() {
            Some(session) => (Arc::clone(&session.buffers), session.config.target_fill()),
            None => return Err(TransparencyError::NotInitialized),
        };

        self.shared.counters.reset();
        let queued = buffers.reset_with_silence(target_fill);
        debug!(queued, capacity = buffers.ring.capacity(), "ring pre-filled with silence");

        // Running before the devices start so the first capture block is kept.
        self.shared.state.store(EngineState::Running);

        if let Err(e) = backend.start(DeviceRole::Capture) {
            warn!("capture start failed: {e}");
            self.shared.state.store(EngineState::Initialized);
            return Err(e);
        }
        if let Err(e) = backend.start(DeviceRole::Playback) {
            warn!("playback start failed, stopping capture: {e}");
            if let Err(stop_err) = backend.stop(DeviceRole::Capture) {
                warn!("capture stop during rollback failed: {stop_err}");
            }
            self.shared.state.store(EngineState::Initialized);
            return Err(e);
        }

        info!("engine running");
        Ok(())
    }

    fn stop_locked(&self, backend: &mut dyn AudioBackend) -> Result<()> {
        match self.shared.state.load() {
            EngineState::Idle => return Err(TransparencyError::NotInitialized),
            EngineState::Initialized => return Ok(()),
            EngineState::Running => {}
        }

        let playback = backend.stop(DeviceRole::Playback);
        let capture = backend.stop(DeviceRole::Capture);
        self.shared.state.store(EngineState::Initialized);

        let counters = self.shared.counters.snapshot();
        info!(
            underruns = counters.underruns,
            overruns = counters.overruns,
            drift_corrections = counters.drift_corrections,
            "engine stopped"
        );
        playback.and(capture)
    }

    fn uninitialize_locked(&self, backend: &mut dyn AudioBackend) -> Result<()> {
        if self.shared.state.load() == EngineState::Idle {
            return Ok(());
        }
        backend.release();
        self.session.lock().take();
        self.shared.state.store(EngineState::Idle);
        info!("engine uninitialized");
        Ok(())
    }

    /// Deliver queued device notices, notify on state change and record the
    /// outcome as the last error.
    fn finish(&self, before: EngineState, result: Result<()>) -> Result<()> {
        self.events.flush();
        let after = self.shared.state.load();
        if after != before {
            self.events.state_changed(after);
        }
        *self.last_error.lock() = result.as_ref().err().map(LastError::from);
        result
    }
}

impl Drop for EngineController {
    fn drop(&mut self) {
        if self.state() != EngineState::Idle {
            if let Err(e) = self.uninitialize() {
                warn!("uninitialize on drop failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for EngineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineController")
            .field("state", &self.state())
            .field("volume", &self.volume())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, OnceLock, Weak};
    use std::thread;
    use std::time::Duration;

    use approx::assert_relative_eq;
    use parking_lot::Mutex as PlMutex;

    use crate::audio::synthetic::{BackendCall, SyntheticBackend};
    use crate::error::ErrorCode;
    use crate::ipc::events::EngineWarning;

    fn mono_config(capacity: usize) -> EngineConfig {
        EngineConfig {
            channels: 1,
            period_frames: 4,
            ring_buffer_frames: Some(capacity),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn operations_before_initialize_report_not_initialized() {
        let (backend, _driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend);

        assert!(matches!(engine.start(), Err(TransparencyError::NotInitialized)));
        assert!(matches!(engine.stop(), Err(TransparencyError::NotInitialized)));
        assert_eq!(
            engine.last_error().map(|e| e.code),
            Some(ErrorCode::DeviceNotInitialized)
        );
        engine.uninitialize().expect("uninitialize while idle is a no-op");
        assert_eq!(engine.last_error(), None);
    }

    #[test]
    fn double_initialize_is_rejected() {
        let (backend, _driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend);
        engine.initialize(mono_config(8)).unwrap();
        assert!(matches!(
            engine.initialize(mono_config(8)),
            Err(TransparencyError::AlreadyInitialized)
        ));
        assert_eq!(engine.state(), EngineState::Initialized);
    }

    #[test]
    fn invalid_config_leaves_engine_idle_without_binding() {
        let (backend, driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend);
        let err = engine
            .initialize(EngineConfig {
                channels: 0,
                ..EngineConfig::default()
            })
            .unwrap_err();
        assert!(matches!(err, TransparencyError::Configuration(_)));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn bind_failure_rolls_back_to_idle() {
        let (backend, driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend.fail_bind());

        let err = engine.initialize(mono_config(8)).unwrap_err();
        assert!(matches!(err, TransparencyError::DeviceOpen { .. }));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(driver.calls(), vec![BackendCall::Bind, BackendCall::Release]);
        assert!(!driver.is_bound());
        assert!(engine.config().is_none());

        assert!(matches!(
            engine.start(),
            Err(TransparencyError::NotInitialized)
        ));
    }

    #[test]
    fn start_and_stop_follow_producer_consumer_order() {
        let (backend, driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend);
        engine.initialize(mono_config(8)).unwrap();
        engine.start().unwrap();
        engine.stop().unwrap();

        assert_eq!(
            driver.calls(),
            vec![
                BackendCall::Bind,
                BackendCall::Start(DeviceRole::Capture),
                BackendCall::Start(DeviceRole::Playback),
                BackendCall::Stop(DeviceRole::Playback),
                BackendCall::Stop(DeviceRole::Capture),
            ]
        );
        assert_eq!(engine.state(), EngineState::Initialized);
    }

    #[test]
    fn idempotent_calls_succeed_without_backend_traffic() {
        let (backend, driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend);
        engine.initialize(mono_config(8)).unwrap();

        engine.stop().expect("stop while initialized is a no-op");
        engine.start().unwrap();
        let calls_after_start = driver.calls().len();
        engine.start().expect("start while running is a no-op");
        assert_eq!(driver.calls().len(), calls_after_start);

        engine.uninitialize().unwrap();
        engine.uninitialize().expect("uninitialize while idle is a no-op");
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn playback_start_failure_stops_capture_and_stays_initialized() {
        let (backend, driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend.fail_start(DeviceRole::Playback));
        engine.initialize(mono_config(8)).unwrap();

        let err = engine.start().unwrap_err();
        assert!(matches!(
            err,
            TransparencyError::DeviceStart {
                role: DeviceRole::Playback,
                ..
            }
        ));
        assert_eq!(engine.state(), EngineState::Initialized);
        assert!(!driver.is_running(DeviceRole::Capture));
        assert_eq!(
            engine.status().last_error,
            Some(ErrorCode::FailedToStartBackendDevice)
        );
    }

    #[test]
    fn uninitialize_while_running_stops_first() {
        let (backend, driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend);
        engine.initialize(mono_config(8)).unwrap();
        engine.start().unwrap();
        engine.uninitialize().unwrap();

        let calls = driver.calls();
        assert_eq!(
            &calls[calls.len() - 3..],
            &[
                BackendCall::Stop(DeviceRole::Playback),
                BackendCall::Stop(DeviceRole::Capture),
                BackendCall::Release,
            ]
        );
        assert!(!driver.is_bound());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn start_resets_counters_and_prefills_half_the_ring() {
        let (backend, driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend);
        engine.initialize(mono_config(8)).unwrap();
        engine.start().unwrap();

        // Starve the output to bump counters, then restart.
        driver.pull_playback(4).unwrap();
        driver.pull_playback(4).unwrap();
        assert_eq!(engine.counters().underruns, 1);

        engine.stop().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.counters(), CounterSnapshot::default());
        assert_relative_eq!(engine.status().buffer_fill, 0.5);
    }

    #[test]
    fn status_reports_fill_and_latency() {
        let (backend, _driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend.with_timing(DeviceTiming::symmetric(48)));
        engine
            .initialize(EngineConfig {
                channels: 2,
                ring_buffer_frames: Some(960),
                ..EngineConfig::default()
            })
            .unwrap();
        engine.start().unwrap();
        engine.set_volume(0.7);

        let status = engine.status();
        assert!(status.running);
        assert_eq!(status.state, EngineState::Running);
        assert_relative_eq!(status.volume, 0.7);
        assert_relative_eq!(status.buffer_fill, 0.5);
        assert_relative_eq!(status.capture_latency_ms, 1.0);
        assert_relative_eq!(status.playback_latency_ms, 1.0);
        // 480 frames queued at 48 kHz = 10 ms, plus two 1 ms periods.
        assert_relative_eq!(status.latency_ms, 12.0, epsilon = 1e-4);
    }

    #[test]
    fn initialize_applies_config_volume() {
        let (backend, _driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend);
        engine
            .initialize(EngineConfig {
                volume: 1.5,
                ..mono_config(8)
            })
            .unwrap();
        assert_eq!(engine.volume(), 1.0);
        assert_eq!(engine.set_volume(0.25), 0.25);
    }

    #[test]
    fn hooks_and_events_see_state_changes_and_warnings() {
        let states = Arc::new(PlMutex::new(Vec::new()));
        let warnings = Arc::new(AtomicUsize::new(0));
        let hooks = EngineHooks::new()
            .on_state_changed({
                let states = Arc::clone(&states);
                move |state| states.lock().push(state)
            })
            .on_warning({
                let warnings = Arc::clone(&warnings);
                move |_| {
                    warnings.fetch_add(1, Ordering::Relaxed);
                }
            });

        let (backend, _driver) = SyntheticBackend::new();
        let backend = backend.warn_on_start(EngineWarning::PriorityNotElevated {
            role: DeviceRole::Capture,
        });
        let engine = EngineController::with_hooks(backend, hooks);
        let mut events = engine.subscribe_events();

        engine.initialize(mono_config(8)).unwrap();
        engine.start().unwrap();
        engine.uninitialize().unwrap();

        assert_eq!(
            *states.lock(),
            vec![
                EngineState::Initialized,
                EngineState::Running,
                EngineState::Initialized,
                EngineState::Idle,
            ]
        );
        assert_eq!(warnings.load(Ordering::Relaxed), 1);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 5);
        assert!(matches!(
            seen[1],
            EngineEvent::Warning {
                warning: EngineWarning::PriorityNotElevated { .. }
            }
        ));
        assert_eq!(
            seen[2],
            EngineEvent::StateChanged {
                state: EngineState::Running
            }
        );
    }

    #[test]
    fn failed_bind_keeps_previous_volume() {
        let (backend, _driver) = SyntheticBackend::new();
        let engine = EngineController::new(backend.fail_bind());
        engine.set_volume(0.3);

        assert!(engine
            .initialize(EngineConfig {
                volume: 0.9,
                ..mono_config(8)
            })
            .is_err());
        assert_relative_eq!(engine.volume(), 0.3);
    }

    #[test]
    fn warning_hook_can_query_status_during_start() {
        let slot: Arc<OnceLock<Weak<EngineController>>> = Arc::new(OnceLock::new());
        let observed = Arc::new(PlMutex::new(Vec::new()));
        let hooks = EngineHooks::new().on_warning({
            let slot = Arc::clone(&slot);
            let observed = Arc::clone(&observed);
            move |_| {
                if let Some(engine) = slot.get().and_then(Weak::upgrade) {
                    let status = engine.status();
                    observed.lock().push((status.state, status.buffer_fill));
                }
            }
        });

        let (backend, _driver) = SyntheticBackend::new();
        let backend = backend.warn_on_start(EngineWarning::PriorityNotElevated {
            role: DeviceRole::Playback,
        });
        let engine = Arc::new(EngineController::with_hooks(backend, hooks));
        slot.set(Arc::downgrade(&engine)).unwrap();
        engine.initialize(mono_config(8)).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let starter = Arc::clone(&engine);
        thread::spawn(move || {
            let _ = done_tx.send(starter.start());
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("start returned while a warning hook queried status")
            .unwrap();

        assert_eq!(*observed.lock(), vec![(EngineState::Running, 0.5)]);
    }

    #[test]
    fn warnings_outside_lifecycle_calls_are_delivered_immediately() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let hooks = EngineHooks::new().on_warning({
            let warnings = Arc::clone(&warnings);
            move |_| {
                warnings.fetch_add(1, Ordering::Relaxed);
            }
        });
        let (backend, driver) = SyntheticBackend::new();
        let engine = EngineController::with_hooks(backend, hooks);
        engine.initialize(mono_config(8)).unwrap();

        driver.emit_warning(EngineWarning::StreamFault {
            role: DeviceRole::Capture,
            message: "glitch".into(),
        });
        assert_eq!(warnings.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn drop_releases_devices() {
        let (backend, driver) = SyntheticBackend::new();
        {
            let engine = EngineController::new(backend);
            engine.initialize(mono_config(8)).unwrap();
            engine.start().unwrap();
        }
        assert!(!driver.is_bound());
        assert_eq!(driver.calls().last(), Some(&BackendCall::Release));
    }
}
