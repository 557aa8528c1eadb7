//! CPAL-backed output device enumeration for desktop platforms
//!
//! Lists the default host's output devices. CPAL exposes no stable device
//! identifier, so the device name doubles as the id.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::MirrorError;

use super::{DeviceEnumerator, OutputDeviceInfo};

/// Enumerates output devices of the default CPAL host
#[derive(Debug, Default)]
pub struct CpalDeviceEnumerator;

impl CpalDeviceEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceEnumerator for CpalDeviceEnumerator {
    fn enumerate(&self) -> Result<Vec<OutputDeviceInfo>, MirrorError> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|err| MirrorError::DeviceUnavailable {
                device: format!("{:?} host: {}", host.id(), err),
            })?;

        Ok(devices
            .enumerate()
            .filter_map(|(index, device)| match device.name() {
                Ok(name) => Some(OutputDeviceInfo::new(index, name.clone(), name)),
                Err(err) => {
                    log::warn!("[CpalDevices] Skipping unnamed device #{}: {}", index, err);
                    None
                }
            })
            .collect())
    }
}
