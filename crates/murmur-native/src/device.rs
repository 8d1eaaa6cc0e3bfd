use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};
use std::fmt;

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// One line of `murmur devices` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_default: bool,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " * {}({}ch, {}hz)", self.name, self.channels, self.sample_rate)?;
        if self.is_default {
            f.write_str(" [default]")?;
        }
        Ok(())
    }
}

/// The input device called `device_name`, or the host default when `None`.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .context("No default input device"),
        Some(target) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No input device named `{}`", target)),
    }
}

/// Same as [`get_or_default_input`] for output devices.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .context("No default output device"),
        Some(target) => host
            .output_devices()
            .context("Failed to enumerate output devices")?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No output device named `{}`", target)),
    }
}

pub fn get_available_inputs() -> anyhow::Result<Vec<DeviceInfo>> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut infos = Vec::new();
    for device in host.input_devices().context("No input devices found")? {
        let Ok(name) = device.name() else {
            continue;
        };
        // Devices without a usable default config cannot be opened anyway.
        let Ok(config) = device.default_input_config() else {
            tracing::debug!("Skipping input device without default config: {}", name);
            continue;
        };
        infos.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            channels: config.channels(),
            sample_rate: config.sample_rate().0,
            name,
        });
    }
    Ok(infos)
}

pub fn get_available_outputs() -> anyhow::Result<Vec<DeviceInfo>> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut infos = Vec::new();
    for device in host.output_devices().context("No output devices found")? {
        let Ok(name) = device.name() else {
            continue;
        };
        let Ok(config) = device.default_output_config() else {
            tracing::debug!("Skipping output device without default config: {}", name);
            continue;
        };
        infos.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            channels: config.channels(),
            sample_rate: config.sample_rate().0,
            name,
        });
    }
    Ok(infos)
}
