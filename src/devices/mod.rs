//! Output devices and binding an engine to one.
//!
//! Devices are identified by the driver id the engine reports. The index is
//! only a hint: it moves whenever devices are plugged or unplugged, so a
//! persisted selection is re-indexed by id before it is applied.

use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::EngineSettings;
use crate::error::{EngineResult, MirrorError};
use crate::studio::{OutputType, StudioSystem, SystemFactory};

cfg_if::cfg_if! {
    if #[cfg(feature = "cpal_devices")] {
        mod cpal;
        pub use self::cpal::CpalDeviceEnumerator;
    }
}

/// Output device descriptor.
///
/// Equality and hashing look at `id` only. The default device has an empty
/// id and never equals an enumerated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDeviceInfo {
    pub index: usize,
    pub id: String,
    pub name: String,
}

impl OutputDeviceInfo {
    pub fn new(index: usize, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
            name: name.into(),
        }
    }

    /// The system default output.
    pub fn default_device() -> Self {
        Self::new(0, "", "")
    }

    pub fn is_default(&self) -> bool {
        self.id.is_empty()
    }

    /// Name for log lines.
    pub fn label(&self) -> &str {
        if self.is_default() {
            "default"
        } else {
            &self.name
        }
    }

    /// Route `system` to this device.
    ///
    /// Selecting the driver the engine already uses is a no-op inside the
    /// engine, so the output is cycled through `NoSound` to force the
    /// rebind (the device behind an index may have changed).
    pub fn apply(&self, system: &mut dyn StudioSystem) -> EngineResult<()> {
        if system.get_driver()? == self.index {
            let output = system.get_output()?;
            system.set_output(OutputType::NoSound)?;
            system.set_output(output)
        } else {
            system.set_driver(self.index)
        }
    }
}

impl Default for OutputDeviceInfo {
    fn default() -> Self {
        Self::default_device()
    }
}

impl PartialEq for OutputDeviceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OutputDeviceInfo {}

impl Hash for OutputDeviceInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Source of the current output device list.
pub trait DeviceEnumerator: Send + Sync {
    fn enumerate(&self) -> Result<Vec<OutputDeviceInfo>, MirrorError>;

    /// Ask the platform to rescan before the next `enumerate`.
    fn refresh(&self) -> Result<(), MirrorError> {
        Ok(())
    }
}

/// Fixed device list, for tests and the simulator.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceEnumerator {
    devices: Arc<RwLock<Vec<OutputDeviceInfo>>>,
}

impl StaticDeviceEnumerator {
    pub fn new(devices: Vec<OutputDeviceInfo>) -> Self {
        Self {
            devices: Arc::new(RwLock::new(devices)),
        }
    }

    /// Replace the list, as if devices were plugged or unplugged.
    pub fn set_devices(&self, devices: Vec<OutputDeviceInfo>) {
        *self.devices.write().unwrap_or_else(PoisonError::into_inner) = devices;
    }
}

impl DeviceEnumerator for StaticDeviceEnumerator {
    fn enumerate(&self) -> Result<Vec<OutputDeviceInfo>, MirrorError> {
        Ok(self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// Lists the drivers of a dedicated engine allocated for enumeration only,
/// so listing never disturbs the engines that are playing.
pub struct EngineDriverEnumerator {
    system: Mutex<Box<dyn StudioSystem>>,
}

impl EngineDriverEnumerator {
    pub fn new(factory: &dyn SystemFactory, settings: &EngineSettings) -> Result<Self, MirrorError> {
        let system = factory
            .create(settings)
            .map_err(|source| MirrorError::engine("device enumeration engine", source))?;
        Ok(Self {
            system: Mutex::new(system),
        })
    }

    fn lock_system(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn StudioSystem>>, MirrorError> {
        self.system.lock().map_err(|_| {
            log::error!("[DeviceManager] Enumeration engine lock poisoned");
            MirrorError::LockPoisoned {
                component: "device_enumerator".to_string(),
            }
        })
    }
}

impl DeviceEnumerator for EngineDriverEnumerator {
    fn enumerate(&self) -> Result<Vec<OutputDeviceInfo>, MirrorError> {
        let system = self.lock_system()?;
        let count = system
            .driver_count()
            .map_err(|source| MirrorError::engine("driver_count", source))?;
        (0..count)
            .map(|index| {
                system
                    .driver_info(index)
                    .map(|info| OutputDeviceInfo::new(index, info.id, info.name))
                    .map_err(|source| MirrorError::engine("driver_info", source))
            })
            .collect()
    }

    /// Cycling the output makes the engine rescan its drivers.
    fn refresh(&self) -> Result<(), MirrorError> {
        let mut system = self.lock_system()?;
        let output = system
            .get_output()
            .map_err(|source| MirrorError::engine("get_output", source))?;
        system
            .set_output(OutputType::NoSound)
            .and_then(|_| system.set_output(output))
            .map_err(|source| MirrorError::engine("set_output", source))
    }
}

impl Drop for EngineDriverEnumerator {
    fn drop(&mut self) {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = system.release() {
            log::debug!("[DeviceManager] Releasing enumeration engine failed: {}", err);
        }
    }
}

/// Keeps the device list current and resolves persisted selections.
pub struct OutputDeviceManager {
    enumerator: Arc<dyn DeviceEnumerator>,
    devices: RwLock<Vec<OutputDeviceInfo>>,
    tx: broadcast::Sender<Vec<OutputDeviceInfo>>,
}

impl OutputDeviceManager {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            enumerator,
            devices: RwLock::new(Vec::new()),
            tx,
        }
    }

    /// Enumerate devices and publish the new list.
    pub fn fetch_devices(&self) -> Result<Vec<OutputDeviceInfo>, MirrorError> {
        let devices = self.enumerator.enumerate()?;
        log::info!("[DeviceManager] {} output devices available", devices.len());
        for device in &devices {
            log::debug!("[DeviceManager]   #{} {} ({})", device.index, device.name, device.id);
        }
        *self.devices.write().unwrap_or_else(PoisonError::into_inner) = devices.clone();
        // No subscribers is fine.
        let _ = self.tx.send(devices.clone());
        Ok(devices)
    }

    /// Rescan, then fetch.
    pub fn reload_device_list(&self) -> Result<Vec<OutputDeviceInfo>, MirrorError> {
        self.enumerator.refresh()?;
        self.fetch_devices()
    }

    /// Platform notification that devices changed.
    pub fn on_device_list_changed(&self) {
        if let Err(err) = self.reload_device_list() {
            log::warn!("[DeviceManager] Failed to reload device list: {}", err);
        }
    }

    pub fn devices(&self) -> Vec<OutputDeviceInfo> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_device(&self, id: &str) -> Option<OutputDeviceInfo> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|device| device.id == id)
            .cloned()
    }

    /// Current descriptor for a persisted selection.
    ///
    /// The default device resolves to itself. A device that is no longer
    /// listed resolves to the default device.
    pub fn resolve(&self, selected: &OutputDeviceInfo) -> OutputDeviceInfo {
        if selected.is_default() {
            return OutputDeviceInfo::default_device();
        }
        match self.get_device(&selected.id) {
            Some(device) => device,
            None => {
                log::warn!(
                    "[DeviceManager] Output device {} ({}) not found, using default",
                    selected.name,
                    selected.id
                );
                OutputDeviceInfo::default_device()
            }
        }
    }

    /// Receive every new device list.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<OutputDeviceInfo>> {
        self.tx.subscribe()
    }
}
