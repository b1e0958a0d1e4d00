//! Everything `EngineController::initialize` needs.

use serde::{Deserialize, Serialize};

use crate::buffering::DEFAULT_RING_CAPACITY;
use crate::error::{Result, TransparencyError};

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 384_000;
pub const MAX_CHANNELS: u16 = crate::buffering::MAX_CHANNELS as u16;

/// Device share mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShareMode {
    #[default]
    Shared,
    Exclusive,
}

/// Latency/robustness trade-off requested from the device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PerformanceProfile {
    /// Ask the devices for `period_frames`-sized callbacks.
    #[default]
    LowLatency,
    /// Let the devices pick their own period.
    Conservative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    /// Capture device identifier. `None` selects the system default.
    pub input_device_id: Option<String>,
    /// Playback device identifier. `None` selects the system default.
    pub output_device_id: Option<String>,
    /// Common rate for both devices (Hz). Default: 48000.
    pub sample_rate: u32,
    /// Interleaved channels on both sides. Default: 2.
    pub channels: u16,
    /// Requested device period in frames. Default: 128 (≈2.7 ms at 48 kHz).
    pub period_frames: u32,
    pub share_mode: ShareMode,
    pub performance_profile: PerformanceProfile,
    /// Initial volume, clamped to `[0.0, 1.0]`. Default: 1.0.
    pub volume: f32,
    /// Ring capacity in frames. `None` uses [`DEFAULT_RING_CAPACITY`].
    pub ring_buffer_frames: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_device_id: None,
            output_device_id: None,
            sample_rate: 48_000,
            channels: 2,
            period_frames: 128,
            share_mode: ShareMode::Shared,
            performance_profile: PerformanceProfile::LowLatency,
            volume: 1.0,
            ring_buffer_frames: None,
        }
    }
}

impl EngineConfig {
    /// Effective ring capacity in frames.
    pub fn ring_capacity(&self) -> usize {
        self.ring_buffer_frames.unwrap_or(DEFAULT_RING_CAPACITY)
    }

    /// Frames of silence queued at start: half the ring.
    pub fn target_fill(&self) -> usize {
        self.ring_capacity() / 2
    }

    /// # Errors
    /// `Configuration` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(TransparencyError::Configuration(format!(
                "sampleRate {} outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(TransparencyError::Configuration(format!(
                "channels {} outside 1..={MAX_CHANNELS}",
                self.channels
            )));
        }
        if self.period_frames == 0 {
            return Err(TransparencyError::Configuration(
                "periodFrames must be non-zero".into(),
            ));
        }
        if self.ring_capacity() < 2 {
            return Err(TransparencyError::Configuration(format!(
                "ringBufferFrames {} is below the 2-frame minimum",
                self.ring_capacity()
            )));
        }
        if !self.volume.is_finite() {
            return Err(TransparencyError::Configuration(
                "volume must be a finite number".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().expect("default config must validate");
        assert_eq!(config.ring_capacity(), 2048);
        assert_eq!(config.target_fill(), 1024);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let cases = [
            EngineConfig {
                sample_rate: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                channels: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                channels: 33,
                ..EngineConfig::default()
            },
            EngineConfig {
                period_frames: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                ring_buffer_frames: Some(1),
                ..EngineConfig::default()
            },
            EngineConfig {
                volume: f32::INFINITY,
                ..EngineConfig::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(TransparencyError::Configuration(_))),
                "expected rejection for {config:?}"
            );
        }
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "sampleRate": 44100, "ringBufferFrames": 512, "shareMode": "exclusive" }"#,
        )
        .expect("parse config");
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.share_mode, ShareMode::Exclusive);
        assert_eq!(config.performance_profile, PerformanceProfile::LowLatency);
        assert_eq!(config.target_fill(), 256);
    }
}
