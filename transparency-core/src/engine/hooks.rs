//! Injected notification handlers.
//!
//! Handlers run synchronously. Anything raised during a lifecycle call is
//! delivered on the caller's thread after the controller has released its
//! backend lock, so a handler may query `status()`. Notices raised outside a
//! lifecycle call run on the device layer's thread. Handlers should stay
//! short; hand work off to another thread (e.g. via a channel `try_send`) if
//! anything heavier is needed.

use std::sync::Arc;

use crate::audio::DeviceRole;
use crate::ipc::events::{EngineState, EngineWarning};

pub type WarningHandler = Arc<dyn Fn(&EngineWarning) + Send + Sync>;
pub type StateChangedHandler = Arc<dyn Fn(EngineState) + Send + Sync>;
pub type DisconnectedHandler = Arc<dyn Fn(DeviceRole, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EngineHooks {
    on_warning: Option<WarningHandler>,
    on_state_changed: Option<StateChangedHandler>,
    on_device_disconnected: Option<DisconnectedHandler>,
}

impl EngineHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_warning(mut self, handler: impl Fn(&EngineWarning) + Send + Sync + 'static) -> Self {
        self.on_warning = Some(Arc::new(handler));
        self
    }

    pub fn on_state_changed(mut self, handler: impl Fn(EngineState) + Send + Sync + 'static) -> Self {
        self.on_state_changed = Some(Arc::new(handler));
        self
    }

    pub fn on_device_disconnected(
        mut self,
        handler: impl Fn(DeviceRole, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_device_disconnected = Some(Arc::new(handler));
        self
    }

    pub(crate) fn warning(&self, warning: &EngineWarning) {
        if let Some(handler) = &self.on_warning {
            handler(warning);
        }
    }

    pub(crate) fn state_changed(&self, state: EngineState) {
        if let Some(handler) = &self.on_state_changed {
            handler(state);
        }
    }

    pub(crate) fn device_disconnected(&self, role: DeviceRole, device_id: &str) {
        if let Some(handler) = &self.on_device_disconnected {
            handler(role, device_id);
        }
    }
}

impl std::fmt::Debug for EngineHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHooks")
            .field("on_warning", &self.on_warning.is_some())
            .field("on_state_changed", &self.on_state_changed.is_some())
            .field("on_device_disconnected", &self.on_device_disconnected.is_some())
            .finish()
    }
}
