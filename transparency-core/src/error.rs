use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::DeviceRole;

/// All errors produced by transparency-core.
///
/// Every variant is returned synchronously from the control-plane call that
/// triggered it. Nothing in this enum is ever raised from an audio callback.
#[derive(Debug, Error)]
pub enum TransparencyError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("engine is already initialized")]
    AlreadyInitialized,

    #[error("engine is not initialized")]
    NotInitialized,

    #[error("failed to initialize audio backend: {0}")]
    BackendInit(String),

    #[error("failed to open {role} device: {message}")]
    DeviceOpen { role: DeviceRole, message: String },

    #[error("failed to start {role} device: {message}")]
    DeviceStart { role: DeviceRole, message: String },

    #[error("failed to stop {role} device: {message}")]
    DeviceStop { role: DeviceRole, message: String },

    #[error("ring buffer allocation failed ({frames} frames x {channels} channels)")]
    OutOfMemory { frames: usize, channels: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransparencyError {
    /// Stable result code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration(_) => ErrorCode::InvalidArgs,
            Self::AlreadyInitialized => ErrorCode::DeviceAlreadyInitialized,
            Self::NotInitialized => ErrorCode::DeviceNotInitialized,
            Self::BackendInit(_) => ErrorCode::FailedToInitBackend,
            Self::DeviceOpen { .. } => ErrorCode::FailedToOpenBackendDevice,
            Self::DeviceStart { .. } => ErrorCode::FailedToStartBackendDevice,
            Self::DeviceStop { .. } | Self::Other(_) => ErrorCode::Error,
            Self::OutOfMemory { .. } => ErrorCode::OutOfMemory,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransparencyError>;

/// Numeric result codes shared with hosts that drive the engine over FFI
/// or persist diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    Success,
    Error,
    InvalidArgs,
    InvalidOperation,
    OutOfMemory,
    DeviceNotInitialized,
    DeviceAlreadyInitialized,
    DeviceNotStarted,
    DeviceNotStopped,
    FailedToInitBackend,
    FailedToOpenBackendDevice,
    FailedToStartBackendDevice,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Error => -1,
            Self::InvalidArgs => -2,
            Self::InvalidOperation => -3,
            Self::OutOfMemory => -4,
            Self::DeviceNotInitialized => -200,
            Self::DeviceAlreadyInitialized => -201,
            Self::DeviceNotStarted => -202,
            Self::DeviceNotStopped => -203,
            Self::FailedToInitBackend => -300,
            Self::FailedToOpenBackendDevice => -301,
            Self::FailedToStartBackendDevice => -302,
        }
    }

    /// Inverse of [`ErrorCode::as_i32`]. Unknown values map to `None`.
    pub fn from_i32(raw: i32) -> Option<Self> {
        let code = match raw {
            0 => Self::Success,
            -1 => Self::Error,
            -2 => Self::InvalidArgs,
            -3 => Self::InvalidOperation,
            -4 => Self::OutOfMemory,
            -200 => Self::DeviceNotInitialized,
            -201 => Self::DeviceAlreadyInitialized,
            -202 => Self::DeviceNotStarted,
            -203 => Self::DeviceNotStopped,
            -300 => Self::FailedToInitBackend,
            -301 => Self::FailedToOpenBackendDevice,
            -302 => Self::FailedToStartBackendDevice,
            _ => return None,
        };
        Some(code)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Error => "General error",
            Self::InvalidArgs => "Invalid arguments",
            Self::InvalidOperation => "Invalid operation",
            Self::OutOfMemory => "Out of memory",
            Self::DeviceNotInitialized => "Device not initialized",
            Self::DeviceAlreadyInitialized => "Device already initialized",
            Self::DeviceNotStarted => "Device not started",
            Self::DeviceNotStopped => "Device not stopped",
            Self::FailedToInitBackend => "Failed to initialize backend",
            Self::FailedToOpenBackendDevice => "Failed to open device",
            Self::FailedToStartBackendDevice => "Failed to start device",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// The most recent failed lifecycle call, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&TransparencyError> for LastError {
    fn from(err: &TransparencyError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_map_to_native_codes() {
        assert_eq!(TransparencyError::AlreadyInitialized.code().as_i32(), -201);
        assert_eq!(TransparencyError::NotInitialized.code().as_i32(), -200);
        assert_eq!(
            TransparencyError::Configuration("channels".into()).code(),
            ErrorCode::InvalidArgs
        );
        let start = TransparencyError::DeviceStart {
            role: DeviceRole::Playback,
            message: "busy".into(),
        };
        assert_eq!(start.code().as_i32(), -302);
        assert_eq!(start.to_string(), "failed to start playback device: busy");
    }

    #[test]
    fn codes_survive_integer_conversion() {
        for code in [
            ErrorCode::Success,
            ErrorCode::OutOfMemory,
            ErrorCode::DeviceNotStopped,
            ErrorCode::FailedToOpenBackendDevice,
        ] {
            assert_eq!(ErrorCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(ErrorCode::from_i32(-999), None);
    }

    #[test]
    fn last_error_captures_code_and_message() {
        let err = TransparencyError::OutOfMemory {
            frames: 8,
            channels: 2,
        };
        let last = LastError::from(&err);
        assert_eq!(last.code, ErrorCode::OutOfMemory);
        assert!(last.message.contains("8 frames x 2 channels"));
        assert_eq!(ErrorCode::OutOfMemory.to_string(), "Out of memory");
    }
}
