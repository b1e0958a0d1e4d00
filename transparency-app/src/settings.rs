//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use transparency_core::engine::config::{MAX_CHANNELS, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use transparency_core::{EngineConfig, PerformanceProfile, ShareMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub period_frames: u32,
    pub exclusive_mode: bool,
    pub performance_profile: String,
    pub volume: f32,
    pub ring_buffer_frames: usize,
    pub status_interval_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: 48_000,
            channels: 2,
            period_frames: 128,
            exclusive_mode: false,
            performance_profile: "low_latency".into(),
            volume: 1.0,
            ring_buffer_frames: 2048,
            status_interval_secs: 5,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.input_device = normalize_device(self.input_device.take());
        self.output_device = normalize_device(self.output_device.take());
        self.sample_rate = self.sample_rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);
        self.channels = self.channels.clamp(1, MAX_CHANNELS);
        self.period_frames = self.period_frames.clamp(16, 4096);
        self.performance_profile = normalize_performance_profile(&self.performance_profile);
        self.volume = if self.volume.is_nan() {
            1.0
        } else {
            self.volume.clamp(0.0, 1.0)
        };
        // At least two periods so the half-full start leaves a full period of headroom.
        let min_ring = (self.period_frames as usize * 2).max(64);
        self.ring_buffer_frames = self.ring_buffer_frames.clamp(min_ring, 1 << 16);
        self.status_interval_secs = self.status_interval_secs.clamp(1, 3600);
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            input_device_id: self.input_device.clone(),
            output_device_id: self.output_device.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            period_frames: self.period_frames,
            share_mode: if self.exclusive_mode {
                ShareMode::Exclusive
            } else {
                ShareMode::Shared
            },
            performance_profile: match self.performance_profile.as_str() {
                "conservative" => PerformanceProfile::Conservative,
                _ => PerformanceProfile::LowLatency,
            },
            volume: self.volume,
            ring_buffer_frames: Some(self.ring_buffer_frames),
        }
    }
}

fn normalize_device(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

pub fn normalize_performance_profile(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "conservative" | "safe" | "stable" => "conservative".into(),
        _ => "low_latency".into(),
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Transparency")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("transparency")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield normalized defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("transparency-settings-{}-{name}", std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn defaults_produce_a_valid_engine_config() {
        let mut settings = AppSettings::default();
        settings.normalize();
        let config = settings.to_engine_config();
        config.validate().expect("default settings must validate");
        assert_eq!(config.ring_capacity(), 2048);
        assert_eq!(config.share_mode, ShareMode::Shared);
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut settings = AppSettings {
            input_device: Some("   ".into()),
            output_device: Some("  Headphones ".into()),
            sample_rate: 1_000,
            channels: 0,
            period_frames: 1,
            performance_profile: " SAFE ".into(),
            volume: f32::NAN,
            ring_buffer_frames: 1,
            status_interval_secs: 0,
            ..AppSettings::default()
        };
        settings.normalize();

        assert_eq!(settings.input_device, None);
        assert_eq!(settings.output_device.as_deref(), Some("Headphones"));
        assert_eq!(settings.sample_rate, MIN_SAMPLE_RATE);
        assert_eq!(settings.channels, 1);
        assert_eq!(settings.period_frames, 16);
        assert_eq!(settings.performance_profile, "conservative");
        assert_eq!(settings.volume, 1.0);
        assert_eq!(settings.ring_buffer_frames, 64);
        assert_eq!(settings.status_interval_secs, 1);
        settings.to_engine_config().validate().unwrap();
    }

    #[test]
    fn ring_is_at_least_two_periods() {
        let mut settings = AppSettings {
            period_frames: 1024,
            ring_buffer_frames: 512,
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.ring_buffer_frames, 2048);
    }

    #[test]
    fn exclusive_and_conservative_map_to_engine_enums() {
        let settings = AppSettings {
            exclusive_mode: true,
            performance_profile: "conservative".into(),
            ..AppSettings::default()
        };
        let config = settings.to_engine_config();
        assert_eq!(config.share_mode, ShareMode::Exclusive);
        assert_eq!(config.performance_profile, PerformanceProfile::Conservative);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let path = scratch_path("roundtrip");
        let settings = AppSettings {
            input_device: Some("USB Mic".into()),
            volume: 0.4,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).expect("save");
        assert_eq!(load_settings(&path), settings);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let path = scratch_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
