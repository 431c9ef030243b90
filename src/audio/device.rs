//! Audio device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Description of a device the microphone or speakers can use
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self { inner: device, name }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Get default input config
    pub fn default_input_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_input_config()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))
    }

    /// Get default output config
    pub fn default_output_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_output_config()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for name in inputs.filter_map(|d| d.name().ok()) {
            devices.push(AudioDeviceInfo {
                id: format!("input:{}", name),
                is_default: default_input.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for name in outputs.filter_map(|d| d.name().ok()) {
            let is_default = default_output.as_ref() == Some(&name);
            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
            } else {
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                });
            }
        }
    }

    devices
}

/// Get a device by its ID (`input:<name>` or `output:<name>`)
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        (true, id)
    };

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    };
    let devices = devices.map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    devices
        .into_iter()
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))
}

/// Get default input device
pub fn get_default_input_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_input_device()
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_output_device()
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}
