use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::studio::system::{StudioSystem, SystemFactory};
use crate::studio::types::{
    parse_guid_path, Attributes3D, BankHandle, BusHandle, CallbackKind, CallbackMask,
    CallbackParameters, DescriptionHandle, DriverInfo, EventCallback, EventId, EventProperty,
    InstanceHandle, OutputType, PlaybackState, StopMode, UserData, VcaHandle, REVERB_SENDS,
};

use super::library::{BankLibrary, ParameterManifest};

/// Maximum number of listeners an engine tracks.
const MAX_LISTENERS: usize = 8;

/// Handles are unique across every in-memory engine in the process, so a
/// handle leaking from one engine into another is caught as invalid.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BankKind {
    Events,
    Strings,
}

struct BankState {
    file_name: String,
    kind: BankKind,
    descriptions: Vec<DescriptionHandle>,
    buses: Vec<String>,
    vcas: Vec<String>,
}

struct DescriptionState {
    id: EventId,
    path: String,
    bus: String,
    parameters: Vec<ParameterManifest>,
    sample_data_refs: usize,
    callback: Option<(EventCallback, CallbackMask)>,
}

struct InstanceState {
    description: DescriptionHandle,
    state: PlaybackState,
    released: bool,
    attributes: Attributes3D,
    listener_mask: u32,
    parameters: Vec<f32>,
    paused: bool,
    pitch: f32,
    properties: [f32; EventProperty::ALL.len()],
    reverb: [f32; REVERB_SENDS],
    timeline_position: i32,
    user_data: UserData,
    volume: f32,
    callback: Option<(EventCallback, CallbackMask)>,
}

#[derive(Default)]
struct BusState {
    mute: bool,
    paused: bool,
}

/// Deterministic engine that keeps all state in memory.
///
/// Banks come from a shared [`BankLibrary`]. Instances never finish on
/// their own: a fadeout stop completes on the next `update`, and a
/// released instance is destroyed on the first `update` that finds it
/// stopped.
pub struct MemoryStudioSystem {
    library: Arc<BankLibrary>,
    released: bool,
    banks: BTreeMap<BankHandle, BankState>,
    descriptions: BTreeMap<DescriptionHandle, DescriptionState>,
    instances: BTreeMap<InstanceHandle, InstanceState>,
    buses: HashMap<String, (BusHandle, BusState)>,
    vcas: HashMap<String, (VcaHandle, f32)>,
    listeners: [Attributes3D; MAX_LISTENERS],
    drivers: Vec<DriverInfo>,
    driver: usize,
    output: OutputType,
    output_switches: usize,
    refuse_unloads: bool,
}

impl MemoryStudioSystem {
    pub fn new(library: Arc<BankLibrary>) -> Self {
        Self::with_drivers(library, vec![Self::default_driver()])
    }

    pub fn with_drivers(library: Arc<BankLibrary>, drivers: Vec<DriverInfo>) -> Self {
        let mut buses = HashMap::new();
        buses.insert(
            "bus:/".to_string(),
            (BusHandle(next_handle()), BusState::default()),
        );
        Self {
            library,
            released: false,
            banks: BTreeMap::new(),
            descriptions: BTreeMap::new(),
            instances: BTreeMap::new(),
            buses,
            vcas: HashMap::new(),
            listeners: [Attributes3D::default(); MAX_LISTENERS],
            drivers,
            driver: 0,
            output: OutputType::Auto,
            output_switches: 0,
            refuse_unloads: false,
        }
    }

    pub fn default_driver() -> DriverInfo {
        DriverInfo {
            name: "Default Output".to_string(),
            id: "memory-default".to_string(),
        }
    }

    /// Number of `set_output` calls that changed the output type.
    pub fn output_switches(&self) -> usize {
        self.output_switches
    }

    /// Whether sample data of `description` is currently pinned.
    pub fn sample_data_loaded(&self, description: DescriptionHandle) -> bool {
        self.descriptions
            .get(&description)
            .map(|d| d.sample_data_refs > 0)
            .unwrap_or(false)
    }

    pub fn loaded_bank_count(&self) -> usize {
        self.banks.len()
    }

    /// Make `unload_bank` fail while leaving the bank loaded, simulating
    /// an engine that still has the bank in use.
    pub fn set_refuse_unloads(&mut self, refuse: bool) {
        self.refuse_unloads = refuse;
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.released {
            Err(EngineError::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn description(&self, handle: DescriptionHandle) -> EngineResult<&DescriptionState> {
        self.ensure_live()?;
        self.descriptions
            .get(&handle)
            .ok_or(EngineError::InvalidHandle { handle: handle.raw() })
    }

    fn description_mut(&mut self, handle: DescriptionHandle) -> EngineResult<&mut DescriptionState> {
        self.ensure_live()?;
        self.descriptions
            .get_mut(&handle)
            .ok_or(EngineError::InvalidHandle { handle: handle.raw() })
    }

    fn instance(&self, handle: InstanceHandle) -> EngineResult<&InstanceState> {
        self.ensure_live()?;
        self.instances
            .get(&handle)
            .ok_or(EngineError::InvalidHandle { handle: handle.raw() })
    }

    fn instance_mut(&mut self, handle: InstanceHandle) -> EngineResult<&mut InstanceState> {
        self.ensure_live()?;
        self.instances
            .get_mut(&handle)
            .ok_or(EngineError::InvalidHandle { handle: handle.raw() })
    }

    fn bus_mut(&mut self, handle: BusHandle) -> EngineResult<(&String, &mut BusState)> {
        self.ensure_live()?;
        self.buses
            .iter_mut()
            .find(|(_, (h, _))| *h == handle)
            .map(|(path, (_, state))| (path, state))
            .ok_or(EngineError::InvalidHandle { handle: handle.raw() })
    }

    fn bus(&self, handle: BusHandle) -> EngineResult<&BusState> {
        self.ensure_live()?;
        self.buses
            .values()
            .find(|(h, _)| *h == handle)
            .map(|(_, state)| state)
            .ok_or(EngineError::InvalidHandle { handle: handle.raw() })
    }

    fn vca_volume_slot(&mut self, handle: VcaHandle) -> EngineResult<&mut f32> {
        self.ensure_live()?;
        self.vcas
            .values_mut()
            .find(|(h, _)| *h == handle)
            .map(|(_, volume)| volume)
            .ok_or(EngineError::InvalidHandle { handle: handle.raw() })
    }

    /// Invoke the instance callback for `kind` when subscribed.
    fn fire(&self, instance: InstanceHandle, kind: CallbackKind) {
        let Some(state) = self.instances.get(&instance) else {
            return;
        };
        if let Some((callback, mask)) = &state.callback {
            if mask.contains(kind.mask()) {
                if let Err(err) = callback(kind, instance, &CallbackParameters::None) {
                    log::debug!(
                        "[MemoryStudio] Callback {:?} on {} returned {}",
                        kind,
                        instance,
                        err
                    );
                }
            }
        }
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) {
        self.fire(instance, CallbackKind::Destroyed);
        self.instances.remove(&instance);
    }

    fn stop_instance(&mut self, instance: InstanceHandle, mode: StopMode) -> EngineResult<()> {
        let state = self.instance_mut(instance)?;
        match (state.state, mode) {
            (PlaybackState::Stopped, _) => Ok(()),
            (_, StopMode::Immediate) | (PlaybackState::Stopping, _) => {
                state.state = PlaybackState::Stopped;
                self.fire(instance, CallbackKind::Stopped);
                Ok(())
            }
            (_, StopMode::AllowFadeout) => {
                state.state = PlaybackState::Stopping;
                Ok(())
            }
        }
    }

    fn bank_name_of(path: &Path) -> EngineResult<(String, BankKind)> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| EngineError::InvalidParam {
                reason: format!("bank path {}", path.display()),
            })?;
        if let Some(name) = file_name.strip_suffix(".strings.bank") {
            Ok((name.to_string(), BankKind::Strings))
        } else if let Some(name) = file_name.strip_suffix(".bank") {
            Ok((name.to_string(), BankKind::Events))
        } else {
            Err(EngineError::InvalidParam {
                reason: format!("not a bank file: {}", file_name),
            })
        }
    }
}

fn bus_routes_to(event_bus: &str, bus_path: &str) -> bool {
    bus_path == "bus:/"
        || event_bus == bus_path
        || event_bus
            .strip_prefix(bus_path)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

impl StudioSystem for MemoryStudioSystem {
    fn update(&mut self) -> EngineResult<()> {
        self.ensure_live()?;

        let fading: Vec<InstanceHandle> = self
            .instances
            .iter()
            .filter(|(_, i)| i.state == PlaybackState::Stopping)
            .map(|(h, _)| *h)
            .collect();
        for handle in fading {
            self.stop_instance(handle, StopMode::Immediate)?;
        }

        let finished: Vec<InstanceHandle> = self
            .instances
            .iter()
            .filter(|(_, i)| i.released && i.state == PlaybackState::Stopped)
            .map(|(h, _)| *h)
            .collect();
        for handle in finished {
            self.destroy_instance(handle);
        }
        Ok(())
    }

    fn release(&mut self) -> EngineResult<()> {
        self.ensure_live()?;
        self.instances.clear();
        self.descriptions.clear();
        self.banks.clear();
        self.buses.clear();
        self.vcas.clear();
        self.released = true;
        log::debug!("[MemoryStudio] Engine released");
        Ok(())
    }

    fn load_bank_file(&mut self, path: &Path) -> EngineResult<BankHandle> {
        self.ensure_live()?;
        let (name, kind) = Self::bank_name_of(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self
            .banks
            .values()
            .any(|bank| bank.file_name == file_name && bank.kind == kind)
        {
            return Err(EngineError::AlreadyLoaded { what: file_name });
        }

        let library = Arc::clone(&self.library);
        let manifest = match library.bank(&name) {
            Some(manifest) if kind == BankKind::Events || manifest.strings => manifest,
            _ => {
                return Err(EngineError::FileNotFound {
                    path: path.display().to_string(),
                })
            }
        };

        let handle = BankHandle(next_handle());
        let mut state = BankState {
            file_name,
            kind,
            descriptions: Vec::new(),
            buses: Vec::new(),
            vcas: Vec::new(),
        };

        if kind == BankKind::Events {
            for event in &manifest.events {
                let description = DescriptionHandle(next_handle());
                self.descriptions.insert(
                    description,
                    DescriptionState {
                        id: event.id,
                        path: event.path.clone(),
                        bus: event.bus.clone(),
                        parameters: event.parameters.clone(),
                        sample_data_refs: 0,
                        callback: None,
                    },
                );
                state.descriptions.push(description);
            }
            for bus in &manifest.buses {
                self.buses
                    .entry(bus.clone())
                    .or_insert_with(|| (BusHandle(next_handle()), BusState::default()));
                state.buses.push(bus.clone());
            }
            for vca in &manifest.vcas {
                self.vcas
                    .entry(vca.clone())
                    .or_insert_with(|| (VcaHandle(next_handle()), 1.0));
                state.vcas.push(vca.clone());
            }
        }

        log::debug!(
            "[MemoryStudio] Loaded bank {} ({} events) as {}",
            state.file_name,
            state.descriptions.len(),
            handle
        );
        self.banks.insert(handle, state);
        Ok(handle)
    }

    fn unload_bank(&mut self, bank: BankHandle) -> EngineResult<()> {
        self.ensure_live()?;
        if self.refuse_unloads {
            return Err(EngineError::Internal {
                details: format!("bank {} is in use", bank),
            });
        }
        let state = self
            .banks
            .remove(&bank)
            .ok_or(EngineError::InvalidHandle { handle: bank.raw() })?;

        let orphaned: Vec<InstanceHandle> = self
            .instances
            .iter()
            .filter(|(_, i)| state.descriptions.contains(&i.description))
            .map(|(h, _)| *h)
            .collect();
        for instance in orphaned {
            self.destroy_instance(instance);
        }
        for description in &state.descriptions {
            self.descriptions.remove(description);
        }
        for bus in &state.buses {
            self.buses.remove(bus);
        }
        for vca in &state.vcas {
            self.vcas.remove(vca);
        }
        Ok(())
    }

    fn bank_path(&self, bank: BankHandle) -> EngineResult<String> {
        self.ensure_live()?;
        self.banks
            .get(&bank)
            .map(|b| format!("bank:/{}", b.file_name))
            .ok_or(EngineError::InvalidHandle { handle: bank.raw() })
    }

    fn bank_event_list(&self, bank: BankHandle) -> EngineResult<Vec<DescriptionHandle>> {
        self.ensure_live()?;
        self.banks
            .get(&bank)
            .map(|b| b.descriptions.clone())
            .ok_or(EngineError::InvalidHandle { handle: bank.raw() })
    }

    fn get_event(&self, path: &str) -> EngineResult<DescriptionHandle> {
        self.ensure_live()?;
        if let Some(id) = parse_guid_path(path) {
            return self.get_event_by_id(id);
        }
        self.descriptions
            .iter()
            .find(|(_, d)| d.path == path)
            .map(|(h, _)| *h)
            .ok_or_else(|| EngineError::EventNotFound {
                what: path.to_string(),
            })
    }

    fn get_event_by_id(&self, id: EventId) -> EngineResult<DescriptionHandle> {
        self.ensure_live()?;
        self.descriptions
            .iter()
            .find(|(_, d)| d.id == id)
            .map(|(h, _)| *h)
            .ok_or_else(|| EngineError::EventNotFound {
                what: id.to_string(),
            })
    }

    fn description_id(&self, description: DescriptionHandle) -> EngineResult<EventId> {
        Ok(self.description(description)?.id)
    }

    fn description_path(&self, description: DescriptionHandle) -> EngineResult<String> {
        Ok(self.description(description)?.path.clone())
    }

    fn description_parameter_count(&self, description: DescriptionHandle) -> EngineResult<usize> {
        Ok(self.description(description)?.parameters.len())
    }

    fn description_instance_count(&self, description: DescriptionHandle) -> EngineResult<usize> {
        Ok(self.description_instance_list(description)?.len())
    }

    fn description_instance_list(
        &self,
        description: DescriptionHandle,
    ) -> EngineResult<Vec<InstanceHandle>> {
        self.description(description)?;
        Ok(self
            .instances
            .iter()
            .filter(|(_, i)| i.description == description)
            .map(|(h, _)| *h)
            .collect())
    }

    fn load_sample_data(&mut self, description: DescriptionHandle) -> EngineResult<()> {
        self.description_mut(description)?.sample_data_refs += 1;
        Ok(())
    }

    fn unload_sample_data(&mut self, description: DescriptionHandle) -> EngineResult<()> {
        let state = self.description_mut(description)?;
        state.sample_data_refs = state.sample_data_refs.saturating_sub(1);
        Ok(())
    }

    fn create_instance(&mut self, description: DescriptionHandle) -> EngineResult<InstanceHandle> {
        let state = self.description(description)?;
        let instance = InstanceHandle(next_handle());
        let parameters = state.parameters.iter().map(|p| p.default).collect();
        let callback = state.callback.clone();

        self.instances.insert(
            instance,
            InstanceState {
                description,
                state: PlaybackState::Stopped,
                released: false,
                attributes: Attributes3D::default(),
                listener_mask: u32::MAX,
                parameters,
                paused: false,
                pitch: 1.0,
                properties: [-1.0; EventProperty::ALL.len()],
                reverb: [0.0; REVERB_SENDS],
                timeline_position: 0,
                user_data: UserData::default(),
                volume: 1.0,
                callback,
            },
        );
        self.fire(instance, CallbackKind::Created);
        Ok(instance)
    }

    fn set_description_callback(
        &mut self,
        description: DescriptionHandle,
        callback: Option<EventCallback>,
        mask: CallbackMask,
    ) -> EngineResult<()> {
        self.description_mut(description)?.callback = callback.map(|cb| (cb, mask));
        Ok(())
    }

    fn instance_description(&self, instance: InstanceHandle) -> EngineResult<DescriptionHandle> {
        Ok(self.instance(instance)?.description)
    }

    fn playback_state(&self, instance: InstanceHandle) -> EngineResult<PlaybackState> {
        Ok(self.instance(instance)?.state)
    }

    fn start(&mut self, instance: InstanceHandle) -> EngineResult<()> {
        let state = self.instance_mut(instance)?;
        let restarted = state.state.is_audible();
        state.state = PlaybackState::Playing;
        // A position set while stopped is where playback begins.
        if restarted {
            state.timeline_position = 0;
            self.fire(instance, CallbackKind::Restarted);
        } else {
            self.fire(instance, CallbackKind::Starting);
            self.fire(instance, CallbackKind::Started);
        }
        Ok(())
    }

    fn stop(&mut self, instance: InstanceHandle, mode: StopMode) -> EngineResult<()> {
        self.stop_instance(instance, mode)
    }

    fn release_instance(&mut self, instance: InstanceHandle) -> EngineResult<()> {
        self.instance_mut(instance)?.released = true;
        Ok(())
    }

    fn trigger_cue(&mut self, instance: InstanceHandle) -> EngineResult<()> {
        let state = self.instance_mut(instance)?;
        if state.state == PlaybackState::Sustaining {
            state.state = PlaybackState::Playing;
        }
        Ok(())
    }

    fn get_3d_attributes(&self, instance: InstanceHandle) -> EngineResult<Attributes3D> {
        Ok(self.instance(instance)?.attributes)
    }

    fn set_3d_attributes(
        &mut self,
        instance: InstanceHandle,
        attributes: Attributes3D,
    ) -> EngineResult<()> {
        self.instance_mut(instance)?.attributes = attributes;
        Ok(())
    }

    fn get_listener_mask(&self, instance: InstanceHandle) -> EngineResult<u32> {
        Ok(self.instance(instance)?.listener_mask)
    }

    fn set_listener_mask(&mut self, instance: InstanceHandle, mask: u32) -> EngineResult<()> {
        self.instance_mut(instance)?.listener_mask = mask;
        Ok(())
    }

    fn set_parameter_value(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        value: f32,
    ) -> EngineResult<()> {
        let description = self.instance(instance)?.description;
        let index = self
            .description(description)?
            .parameters
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| EngineError::EventNotFound {
                what: format!("parameter {}", name),
            })?;
        self.set_parameter_value_by_index(instance, index, value)
    }

    fn get_parameter_value_by_index(
        &self,
        instance: InstanceHandle,
        index: usize,
    ) -> EngineResult<f32> {
        self.instance(instance)?
            .parameters
            .get(index)
            .copied()
            .ok_or_else(|| EngineError::InvalidParam {
                reason: format!("parameter index {}", index),
            })
    }

    fn set_parameter_value_by_index(
        &mut self,
        instance: InstanceHandle,
        index: usize,
        value: f32,
    ) -> EngineResult<()> {
        let slot = self
            .instance_mut(instance)?
            .parameters
            .get_mut(index)
            .ok_or_else(|| EngineError::InvalidParam {
                reason: format!("parameter index {}", index),
            })?;
        *slot = value;
        Ok(())
    }

    fn set_parameter_values_by_indices(
        &mut self,
        instance: InstanceHandle,
        indices: &[usize],
        values: &[f32],
    ) -> EngineResult<()> {
        if indices.len() != values.len() {
            return Err(EngineError::InvalidParam {
                reason: format!("{} indices for {} values", indices.len(), values.len()),
            });
        }
        let state = self.instance_mut(instance)?;
        if let Some(bad) = indices.iter().find(|i| **i >= state.parameters.len()) {
            return Err(EngineError::InvalidParam {
                reason: format!("parameter index {}", bad),
            });
        }
        for (index, value) in indices.iter().zip(values) {
            state.parameters[*index] = *value;
        }
        Ok(())
    }

    fn get_paused(&self, instance: InstanceHandle) -> EngineResult<bool> {
        Ok(self.instance(instance)?.paused)
    }

    fn set_paused(&mut self, instance: InstanceHandle, paused: bool) -> EngineResult<()> {
        self.instance_mut(instance)?.paused = paused;
        Ok(())
    }

    fn get_pitch(&self, instance: InstanceHandle) -> EngineResult<f32> {
        Ok(self.instance(instance)?.pitch)
    }

    fn set_pitch(&mut self, instance: InstanceHandle, pitch: f32) -> EngineResult<()> {
        self.instance_mut(instance)?.pitch = pitch;
        Ok(())
    }

    fn get_property(&self, instance: InstanceHandle, property: EventProperty) -> EngineResult<f32> {
        Ok(self.instance(instance)?.properties[property.index()])
    }

    fn set_property(
        &mut self,
        instance: InstanceHandle,
        property: EventProperty,
        value: f32,
    ) -> EngineResult<()> {
        self.instance_mut(instance)?.properties[property.index()] = value;
        Ok(())
    }

    fn get_reverb_level(&self, instance: InstanceHandle, index: usize) -> EngineResult<f32> {
        self.instance(instance)?
            .reverb
            .get(index)
            .copied()
            .ok_or_else(|| EngineError::InvalidParam {
                reason: format!("reverb index {}", index),
            })
    }

    fn set_reverb_level(
        &mut self,
        instance: InstanceHandle,
        index: usize,
        level: f32,
    ) -> EngineResult<()> {
        let slot = self
            .instance_mut(instance)?
            .reverb
            .get_mut(index)
            .ok_or_else(|| EngineError::InvalidParam {
                reason: format!("reverb index {}", index),
            })?;
        *slot = level;
        Ok(())
    }

    fn get_timeline_position(&self, instance: InstanceHandle) -> EngineResult<i32> {
        Ok(self.instance(instance)?.timeline_position)
    }

    fn set_timeline_position(
        &mut self,
        instance: InstanceHandle,
        position: i32,
    ) -> EngineResult<()> {
        if position < 0 {
            return Err(EngineError::InvalidParam {
                reason: format!("timeline position {}", position),
            });
        }
        self.instance_mut(instance)?.timeline_position = position;
        Ok(())
    }

    fn get_user_data(&self, instance: InstanceHandle) -> EngineResult<UserData> {
        Ok(self.instance(instance)?.user_data)
    }

    fn set_user_data(&mut self, instance: InstanceHandle, data: UserData) -> EngineResult<()> {
        self.instance_mut(instance)?.user_data = data;
        Ok(())
    }

    fn get_volume(&self, instance: InstanceHandle) -> EngineResult<f32> {
        Ok(self.instance(instance)?.volume)
    }

    fn set_volume(&mut self, instance: InstanceHandle, volume: f32) -> EngineResult<()> {
        self.instance_mut(instance)?.volume = volume;
        Ok(())
    }

    fn set_instance_callback(
        &mut self,
        instance: InstanceHandle,
        callback: Option<EventCallback>,
        mask: CallbackMask,
    ) -> EngineResult<()> {
        self.instance_mut(instance)?.callback = callback.map(|cb| (cb, mask));
        Ok(())
    }

    fn get_bus(&self, path: &str) -> EngineResult<BusHandle> {
        self.ensure_live()?;
        self.buses
            .get(path)
            .map(|(handle, _)| *handle)
            .ok_or_else(|| EngineError::EventNotFound {
                what: path.to_string(),
            })
    }

    fn bus_get_mute(&self, bus: BusHandle) -> EngineResult<bool> {
        Ok(self.bus(bus)?.mute)
    }

    fn bus_set_mute(&mut self, bus: BusHandle, mute: bool) -> EngineResult<()> {
        self.bus_mut(bus)?.1.mute = mute;
        Ok(())
    }

    fn bus_get_paused(&self, bus: BusHandle) -> EngineResult<bool> {
        Ok(self.bus(bus)?.paused)
    }

    fn bus_set_paused(&mut self, bus: BusHandle, paused: bool) -> EngineResult<()> {
        self.bus_mut(bus)?.1.paused = paused;
        Ok(())
    }

    fn bus_stop_all_events(&mut self, bus: BusHandle, mode: StopMode) -> EngineResult<()> {
        let bus_path = self.bus_mut(bus)?.0.clone();
        let routed: Vec<InstanceHandle> = self
            .instances
            .iter()
            .filter(|(_, i)| {
                self.descriptions
                    .get(&i.description)
                    .map(|d| bus_routes_to(&d.bus, &bus_path))
                    .unwrap_or(false)
            })
            .map(|(h, _)| *h)
            .collect();
        for instance in routed {
            self.stop_instance(instance, mode)?;
        }
        Ok(())
    }

    fn get_vca(&self, path: &str) -> EngineResult<VcaHandle> {
        self.ensure_live()?;
        self.vcas
            .get(path)
            .map(|(handle, _)| *handle)
            .ok_or_else(|| EngineError::EventNotFound {
                what: path.to_string(),
            })
    }

    fn vca_get_volume(&self, vca: VcaHandle) -> EngineResult<f32> {
        self.ensure_live()?;
        self.vcas
            .values()
            .find(|(h, _)| *h == vca)
            .map(|(_, volume)| *volume)
            .ok_or(EngineError::InvalidHandle { handle: vca.raw() })
    }

    fn vca_set_volume(&mut self, vca: VcaHandle, volume: f32) -> EngineResult<()> {
        *self.vca_volume_slot(vca)? = volume;
        Ok(())
    }

    fn set_listener_attributes(
        &mut self,
        listener: usize,
        attributes: Attributes3D,
    ) -> EngineResult<()> {
        self.ensure_live()?;
        let slot = self
            .listeners
            .get_mut(listener)
            .ok_or_else(|| EngineError::InvalidParam {
                reason: format!("listener {}", listener),
            })?;
        *slot = attributes;
        Ok(())
    }

    fn get_listener_attributes(&self, listener: usize) -> EngineResult<Attributes3D> {
        self.ensure_live()?;
        self.listeners
            .get(listener)
            .copied()
            .ok_or_else(|| EngineError::InvalidParam {
                reason: format!("listener {}", listener),
            })
    }

    fn driver_count(&self) -> EngineResult<usize> {
        self.ensure_live()?;
        Ok(self.drivers.len())
    }

    fn driver_info(&self, index: usize) -> EngineResult<DriverInfo> {
        self.ensure_live()?;
        self.drivers
            .get(index)
            .cloned()
            .ok_or_else(|| EngineError::OutputDriver {
                details: format!("no driver at index {}", index),
            })
    }

    fn get_driver(&self) -> EngineResult<usize> {
        self.ensure_live()?;
        Ok(self.driver)
    }

    fn set_driver(&mut self, index: usize) -> EngineResult<()> {
        self.ensure_live()?;
        if index >= self.drivers.len() {
            return Err(EngineError::OutputDriver {
                details: format!("no driver at index {}", index),
            });
        }
        self.driver = index;
        Ok(())
    }

    fn get_output(&self) -> EngineResult<OutputType> {
        self.ensure_live()?;
        Ok(self.output)
    }

    fn set_output(&mut self, output: OutputType) -> EngineResult<()> {
        self.ensure_live()?;
        if self.output != output {
            self.output = output;
            self.output_switches += 1;
        }
        Ok(())
    }
}

/// Allocates [`MemoryStudioSystem`]s over one shared library.
pub struct MemorySystemFactory {
    library: Arc<BankLibrary>,
    drivers: Vec<DriverInfo>,
    available: AtomicBool,
    created: AtomicUsize,
}

impl MemorySystemFactory {
    pub fn new(library: Arc<BankLibrary>) -> Self {
        Self::with_drivers(library, vec![MemoryStudioSystem::default_driver()])
    }

    pub fn with_drivers(library: Arc<BankLibrary>, drivers: Vec<DriverInfo>) -> Self {
        Self {
            library,
            drivers,
            available: AtomicBool::new(true),
            created: AtomicUsize::new(0),
        }
    }

    /// Make subsequent `create` calls fail, simulating an engine that
    /// cannot be allocated.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of engines allocated so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SystemFactory for MemorySystemFactory {
    fn create(&self, settings: &EngineSettings) -> EngineResult<Box<dyn StudioSystem>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(EngineError::Internal {
                details: "engine allocation failed".to_string(),
            });
        }
        if settings.max_channels == 0 {
            return Err(EngineError::InvalidParam {
                reason: "max_channels must be positive".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "[MemoryStudio] Created engine with {} channels",
            settings.max_channels
        );
        Ok(Box::new(MemoryStudioSystem::with_drivers(
            Arc::clone(&self.library),
            self.drivers.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn system() -> MemoryStudioSystem {
        MemoryStudioSystem::new(Arc::new(BankLibrary::demo()))
    }

    fn bank_path(file: &str) -> PathBuf {
        PathBuf::from("Content/FMOD/Desktop").join(file)
    }

    fn recorder() -> (EventCallback, Arc<Mutex<Vec<(CallbackKind, InstanceHandle)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: EventCallback = Arc::new(
            move |kind: CallbackKind, instance: InstanceHandle, _params: &CallbackParameters| {
                sink.lock().unwrap().push((kind, instance));
                Ok(())
            },
        );
        (callback, seen)
    }

    #[test]
    fn test_load_bank_twice_is_already_loaded() {
        let mut sys = system();
        sys.load_bank_file(&bank_path("music.bank")).unwrap();
        let err = sys.load_bank_file(&bank_path("music.bank")).unwrap_err();
        assert!(err.is_already_loaded());
    }

    #[test]
    fn test_strings_bank_requires_manifest_flag() {
        let mut sys = system();
        assert!(sys.load_bank_file(&bank_path("master.strings.bank")).is_ok());
        let err = sys
            .load_bank_file(&bank_path("music.strings.bank"))
            .unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound { .. }));
    }

    #[test]
    fn test_unknown_bank_is_file_not_found() {
        let mut sys = system();
        let err = sys.load_bank_file(&bank_path("nope.bank")).unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound { .. }));
    }

    #[test]
    fn test_event_lookup_by_path_and_guid() {
        let mut sys = system();
        let bank = sys.load_bank_file(&bank_path("music.bank")).unwrap();
        assert_eq!(sys.bank_event_list(bank).unwrap().len(), 3);

        let by_path = sys.get_event("event:/music/lvl1").unwrap();
        let id = sys.description_id(by_path).unwrap();
        assert_eq!(sys.get_event_by_id(id).unwrap(), by_path);
        assert_eq!(sys.get_event(&format!("guid://{}", id)).unwrap(), by_path);
        assert!(sys.get_event("event:/none").unwrap_err().is_not_found());
    }

    #[test]
    fn test_instance_defaults() {
        let mut sys = system();
        sys.load_bank_file(&bank_path("music.bank")).unwrap();
        let desc = sys.get_event("event:/music/lvl1").unwrap();
        let inst = sys.create_instance(desc).unwrap();

        assert_eq!(sys.playback_state(inst).unwrap(), PlaybackState::Stopped);
        assert_eq!(sys.get_volume(inst).unwrap(), 1.0);
        assert_eq!(sys.get_pitch(inst).unwrap(), 1.0);
        assert_eq!(sys.get_listener_mask(inst).unwrap(), u32::MAX);
        assert_eq!(sys.get_parameter_value_by_index(inst, 0).unwrap(), 1.0);
        for property in EventProperty::ALL {
            assert_eq!(sys.get_property(inst, property).unwrap(), -1.0);
        }
        assert_eq!(sys.description_instance_count(desc).unwrap(), 1);
    }

    #[test]
    fn test_start_keeps_position_only_from_stopped() {
        let mut sys = system();
        sys.load_bank_file(&bank_path("music.bank")).unwrap();
        let desc = sys.get_event("event:/music/lvl1").unwrap();
        let inst = sys.create_instance(desc).unwrap();

        sys.set_timeline_position(inst, 1500).unwrap();
        sys.start(inst).unwrap();
        assert_eq!(sys.get_timeline_position(inst).unwrap(), 1500);

        sys.start(inst).unwrap();
        assert_eq!(sys.get_timeline_position(inst).unwrap(), 0);
    }

    #[test]
    fn test_released_instance_destroyed_on_update_after_stop() {
        let mut sys = system();
        sys.load_bank_file(&bank_path("music.bank")).unwrap();
        let desc = sys.get_event("event:/music/lvl1").unwrap();
        let (callback, seen) = recorder();
        sys.set_description_callback(desc, Some(callback), CallbackMask::all())
            .unwrap();

        let inst = sys.create_instance(desc).unwrap();
        sys.start(inst).unwrap();
        sys.release_instance(inst).unwrap();
        sys.update().unwrap();
        assert!(sys.playback_state(inst).is_ok());

        sys.stop(inst, StopMode::AllowFadeout).unwrap();
        assert_eq!(sys.playback_state(inst).unwrap(), PlaybackState::Stopping);
        sys.update().unwrap();
        assert!(sys.playback_state(inst).is_err());

        let kinds: Vec<CallbackKind> = seen.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                CallbackKind::Created,
                CallbackKind::Starting,
                CallbackKind::Started,
                CallbackKind::Stopped,
                CallbackKind::Destroyed,
            ]
        );
    }

    #[test]
    fn test_callback_mask_filters_kinds() {
        let mut sys = system();
        sys.load_bank_file(&bank_path("music.bank")).unwrap();
        let desc = sys.get_event("event:/music/lvl1").unwrap();
        let inst = sys.create_instance(desc).unwrap();
        let (callback, seen) = recorder();
        sys.set_instance_callback(inst, Some(callback), CallbackMask::DESTROYED)
            .unwrap();

        sys.start(inst).unwrap();
        sys.stop(inst, StopMode::Immediate).unwrap();
        sys.release_instance(inst).unwrap();
        sys.update().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(CallbackKind::Destroyed, inst)]
        );
    }

    #[test]
    fn test_parameter_batch_validation() {
        let mut sys = system();
        sys.load_bank_file(&bank_path("music.bank")).unwrap();
        let desc = sys.get_event("event:/music/lvl1").unwrap();
        let inst = sys.create_instance(desc).unwrap();

        sys.set_parameter_values_by_indices(inst, &[0, 2], &[0.25, 0.75])
            .unwrap();
        assert_eq!(sys.get_parameter_value_by_index(inst, 2).unwrap(), 0.75);
        assert!(sys
            .set_parameter_values_by_indices(inst, &[0], &[0.1, 0.2])
            .is_err());
        assert!(sys.set_parameter_values_by_indices(inst, &[9], &[0.1]).is_err());

        sys.set_parameter_value(inst, "fade", 0.5).unwrap();
        assert_eq!(sys.get_parameter_value_by_index(inst, 2).unwrap(), 0.5);
        assert!(sys
            .set_parameter_value(inst, "missing", 0.5)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_bus_stop_all_respects_routing() {
        let mut sys = system();
        sys.load_bank_file(&bank_path("master.bank")).unwrap();
        sys.load_bank_file(&bank_path("music.bank")).unwrap();
        sys.load_bank_file(&bank_path("sfx.bank")).unwrap();

        let music = sys
            .create_instance(sys.get_event("event:/music/lvl1").unwrap())
            .unwrap();
        let ui = sys
            .create_instance(sys.get_event("event:/ui/confirm").unwrap())
            .unwrap();
        sys.start(music).unwrap();
        sys.start(ui).unwrap();

        let sfx_bus = sys.get_bus("bus:/sfx").unwrap();
        sys.bus_stop_all_events(sfx_bus, StopMode::Immediate).unwrap();
        assert_eq!(sys.playback_state(ui).unwrap(), PlaybackState::Stopped);
        assert_eq!(sys.playback_state(music).unwrap(), PlaybackState::Playing);

        let master = sys.get_bus("bus:/").unwrap();
        sys.bus_stop_all_events(master, StopMode::Immediate).unwrap();
        assert_eq!(sys.playback_state(music).unwrap(), PlaybackState::Stopped);
    }

    #[test]
    fn test_vca_lookup_needs_master_bank() {
        let mut sys = system();
        assert!(sys.get_vca("vca:/music").unwrap_err().is_not_found());
        sys.load_bank_file(&bank_path("master.bank")).unwrap();
        let vca = sys.get_vca("vca:/music").unwrap();
        assert_eq!(sys.vca_get_volume(vca).unwrap(), 1.0);
        sys.vca_set_volume(vca, 0.5).unwrap();
        assert_eq!(sys.vca_get_volume(vca).unwrap(), 0.5);
    }

    #[test]
    fn test_unload_bank_destroys_instances() {
        let mut sys = system();
        let bank = sys.load_bank_file(&bank_path("music.bank")).unwrap();
        let desc = sys.get_event("event:/music/lvl1").unwrap();
        let inst = sys.create_instance(desc).unwrap();
        sys.unload_bank(bank).unwrap();

        assert!(sys.playback_state(inst).is_err());
        assert!(sys.get_event("event:/music/lvl1").is_err());
        assert_eq!(sys.loaded_bank_count(), 0);
    }

    #[test]
    fn test_refused_unload_keeps_bank() {
        let mut sys = system();
        let bank = sys.load_bank_file(&bank_path("music.bank")).unwrap();
        sys.set_refuse_unloads(true);

        assert!(matches!(
            sys.unload_bank(bank),
            Err(EngineError::Internal { .. })
        ));
        assert_eq!(sys.loaded_bank_count(), 1);
        assert!(sys.get_event("event:/music/lvl1").is_ok());

        sys.set_refuse_unloads(false);
        sys.unload_bank(bank).unwrap();
        assert_eq!(sys.loaded_bank_count(), 0);
    }

    #[test]
    fn test_release_invalidates_engine() {
        let mut sys = system();
        sys.release().unwrap();
        assert_eq!(sys.update().unwrap_err(), EngineError::NotInitialized);
        assert_eq!(sys.release().unwrap_err(), EngineError::NotInitialized);
    }

    #[test]
    fn test_driver_selection() {
        let drivers = vec![
            MemoryStudioSystem::default_driver(),
            DriverInfo {
                name: "Headphones".to_string(),
                id: "hp".to_string(),
            },
        ];
        let mut sys = MemoryStudioSystem::with_drivers(Arc::new(BankLibrary::demo()), drivers);
        assert_eq!(sys.driver_count().unwrap(), 2);
        sys.set_driver(1).unwrap();
        assert_eq!(sys.get_driver().unwrap(), 1);
        assert!(matches!(
            sys.set_driver(5).unwrap_err(),
            EngineError::OutputDriver { .. }
        ));

        sys.set_output(OutputType::NoSound).unwrap();
        sys.set_output(OutputType::Auto).unwrap();
        assert_eq!(sys.output_switches(), 2);
    }

    #[test]
    fn test_handles_are_unique_across_engines() {
        let mut a = system();
        let mut b = system();
        let bank_a = a.load_bank_file(&bank_path("music.bank")).unwrap();
        let bank_b = b.load_bank_file(&bank_path("music.bank")).unwrap();
        assert_ne!(bank_a, bank_b);
        assert!(a.bank_event_list(bank_b).is_err());
    }

    #[test]
    fn test_factory_availability() {
        let factory = MemorySystemFactory::new(Arc::new(BankLibrary::demo()));
        let settings = EngineSettings::default();
        assert!(factory.create(&settings).is_ok());
        factory.set_available(false);
        assert!(factory.create(&settings).is_err());
        assert_eq!(factory.created(), 1);

        factory.set_available(true);
        let zero = EngineSettings {
            max_channels: 0,
            ..EngineSettings::default()
        };
        assert!(matches!(
            factory.create(&zero),
            Err(EngineError::InvalidParam { .. })
        ));
    }
}
