//! Audio device enumeration.
//!
//! cpal exposes no stable device identifier, so the OS-reported name doubles
//! as the id accepted by `EngineConfig::{input,output}_device_id`.

use serde::{Deserialize, Serialize};

use crate::audio::DeviceRole;

/// Metadata about a capture or playback device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Identifier to put in the engine configuration.
    pub id: String,
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub role: DeviceRole,
    /// Whether this is the system default for its role.
    pub is_default: bool,
    /// Default sample rate (Hz), when the device reports one.
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Sort defaults first, then by case-insensitive name.
fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

/// List all capture devices on the default host.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
pub fn list_capture_devices() -> Vec<DeviceInfo> {
    list_devices(DeviceRole::Capture)
}

/// List all playback devices on the default host.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
pub fn list_playback_devices() -> Vec<DeviceInfo> {
    list_devices(DeviceRole::Playback)
}

#[cfg(feature = "audio-cpal")]
fn list_devices(role: DeviceRole) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let (default_name, devices) = match role {
        DeviceRole::Capture => (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.input_devices(),
        ),
        DeviceRole::Playback => (
            host.default_output_device().and_then(|d| d.name().ok()),
            host.output_devices(),
        ),
    };

    let devices = match devices {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!(%role, "failed to enumerate devices: {e}");
            return default_name
                .map(|name| {
                    vec![DeviceInfo {
                        id: name.clone(),
                        name,
                        role,
                        is_default: true,
                        sample_rate: None,
                        channels: None,
                    }]
                })
                .unwrap_or_default();
        }
    };

    let mut list = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("{role} device {}", idx + 1));
            let default_config = match role {
                DeviceRole::Capture => device.default_input_config(),
                DeviceRole::Playback => device.default_output_config(),
            }
            .ok();
            DeviceInfo {
                id: name.clone(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                sample_rate: default_config.as_ref().map(|c| c.sample_rate().0),
                channels: default_config.as_ref().map(|c| c.channels()),
                name,
                role,
            }
        })
        .collect::<Vec<_>>();

    sort_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
fn list_devices(_role: DeviceRole) -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            id: name.into(),
            name: name.into(),
            role: DeviceRole::Playback,
            is_default,
            sample_rate: Some(48_000),
            channels: Some(2),
        }
    }

    #[test]
    fn default_device_sorts_first() {
        let mut list = vec![
            info("USB Headphones", false),
            info("speakers", true),
            info("Analog Out", false),
        ];
        sort_devices(&mut list);
        let names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["speakers", "Analog Out", "USB Headphones"]);
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(info("Analog Out", true)).unwrap();
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["sampleRate"], 48_000);
        assert_eq!(json["role"], "playback");
    }
}
