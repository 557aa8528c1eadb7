//! Host-facing adapter around the primary engine.
//!
//! The host performs every audio call through [`MirroredAudio`]. Each call
//! runs on the primary first; only a successful primary call is offered to
//! the observers, and the primary result is returned unchanged.

use std::sync::Arc;

use crate::devices::OutputDeviceInfo;
use crate::error::EngineResult;
use crate::studio::{
    parse_guid_path, Attributes3D, BankHandle, CallbackMask, DescriptionHandle, EventCallback,
    EventProperty, InstanceHandle, StopMode, StudioSystem, UserData, Vector3,
};

use super::bank_cache::{BankLocator, BankRecord};
use super::callbacks::{empty_callback, wrap_callback};
use super::catalog::{HostCatalog, PrimaryView};
use super::event_cache::is_silent_path;
use super::observer::{AudioEngineObserver, ObserverList};
use super::ops::InstanceOp;
use super::recursion::RecursionGuard;

const CREATE_KEY: &str = "instance.create";

/// The primary engine plus the host's audio bookkeeping, with every
/// mutating call observable.
pub struct MirroredAudio {
    primary: Box<dyn StudioSystem>,
    catalog: HostCatalog,
    observers: ObserverList,
    guard: Arc<RecursionGuard>,
    locator: Arc<dyn BankLocator>,
    unload_unused_audio: bool,
}

impl MirroredAudio {
    pub fn new(
        primary: Box<dyn StudioSystem>,
        locator: Arc<dyn BankLocator>,
        unload_unused_audio: bool,
    ) -> Self {
        Self {
            primary,
            catalog: HostCatalog::new(),
            observers: ObserverList::new(),
            guard: Arc::new(RecursionGuard::new()),
            locator,
            unload_unused_audio,
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn AudioEngineObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn AudioEngineObserver>) -> bool {
        self.observers.remove(observer)
    }

    pub fn observers(&self) -> &ObserverList {
        &self.observers
    }

    /// Shared with anything that needs to hold an operation key.
    pub fn guard(&self) -> Arc<RecursionGuard> {
        Arc::clone(&self.guard)
    }

    /// Read access for getters; reads are never mirrored.
    pub fn primary(&self) -> &dyn StudioSystem {
        self.primary.as_ref()
    }

    pub fn catalog(&self) -> &HostCatalog {
        &self.catalog
    }

    pub fn view(&self) -> PrimaryView<'_> {
        PrimaryView::new(self.primary.as_ref(), &self.catalog)
    }

    pub fn set_unload_unused_audio(&mut self, enabled: bool) {
        self.unload_unused_audio = enabled;
    }

    // --- banks -----------------------------------------------------------

    /// Load bank `name` (and its string table) into the primary.
    ///
    /// Every description of the bank gets the wrapping callback so each
    /// instance reports DESTROYED from creation on. Ready contexts load the
    /// bank right away.
    pub fn load_bank(&mut self, name: &str, load_strings: bool) -> EngineResult<BankHandle> {
        if let Some(handle) = self.catalog.bank(name) {
            return Ok(handle);
        }

        let bank = self.primary.load_bank_file(&self.locator.bank_file(name))?;
        if load_strings {
            match self.primary.load_bank_file(&self.locator.strings_bank_file(name)) {
                Ok(_) => {}
                // The string table outlives its bank in the primary.
                Err(err) if err.is_already_loaded() => {}
                Err(err) => {
                    if let Err(unload_err) = self.primary.unload_bank(bank) {
                        log::warn!("[Audio] Failed to roll back bank {}: {}", name, unload_err);
                    }
                    return Err(err);
                }
            }
        }
        self.catalog.record_bank(name, bank, load_strings);
        log::debug!("[Audio] Loaded bank {} as {}", name, bank);

        self.install_description_callbacks(bank);

        let record = BankRecord::new(name, self.catalog.needs_strings(name));
        for observer in self.observers.snapshot() {
            observer.on_bank_loaded(&record);
        }
        Ok(bank)
    }

    fn install_description_callbacks(&mut self, bank: BankHandle) {
        let descriptions = match self.primary.bank_event_list(bank) {
            Ok(descriptions) => descriptions,
            Err(err) => {
                log::warn!("[Audio] Failed to list events of bank {}: {}", bank, err);
                return;
            }
        };
        for description in descriptions {
            let (callback, mask) = wrap_callback(
                self.observers.clone(),
                Some(empty_callback()),
                CallbackMask::empty(),
            );
            if let Err(err) = self
                .primary
                .set_description_callback(description, Some(callback), mask)
            {
                tracing::debug!(
                    "[Audio] Failed to hook description {}: {}",
                    description,
                    err
                );
            }
        }
    }

    /// Unload bank `name` from the primary. Secondary engines keep their
    /// copy until they terminate.
    pub fn unload_bank(&mut self, name: &str) -> EngineResult<()> {
        let Some(bank) = self.catalog.bank(name) else {
            return Ok(());
        };
        let descriptions = self.primary.bank_event_list(bank).unwrap_or_default();
        self.primary.unload_bank(bank)?;
        self.catalog.forget_descriptions(&descriptions);
        self.catalog.forget_bank(name);
        log::debug!("[Audio] Unloaded bank {}", name);
        Ok(())
    }

    // --- descriptions ----------------------------------------------------

    /// Resolve `path` (or a `guid://` reference) in the primary and pin its
    /// sample data. `Ok(None)` when the event doesn't exist.
    pub fn get_event_description(&mut self, path: &str) -> EngineResult<Option<DescriptionHandle>> {
        if path.is_empty() {
            return Ok(None);
        }

        let handle = match self.catalog.description(path) {
            Some(handle) => Some(handle),
            None => self.resolve_description(path)?,
        };

        let id = handle.and_then(|handle| self.primary.description_id(handle).ok());
        for observer in self.observers.snapshot() {
            observer.on_description_resolved(path, id);
        }
        Ok(handle)
    }

    fn resolve_description(&mut self, path: &str) -> EngineResult<Option<DescriptionHandle>> {
        let resolved = match parse_guid_path(path) {
            Some(id) => self.primary.get_event_by_id(id),
            None => self.primary.get_event(path),
        };
        match resolved {
            Ok(handle) => {
                self.primary.load_sample_data(handle)?;
                self.catalog.cache_description(path, handle);
                Ok(Some(handle))
            }
            Err(err) if err.is_not_found() => {
                if !is_silent_path(path) {
                    log::warn!("[Audio] Event not found: {}", path);
                }
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Unpin and forget every cached description without live instances.
    /// Secondary engines follow only when unused-audio unloading is on.
    pub fn release_unused_descriptions(&mut self) -> usize {
        let counts = self.view().instance_counts();
        let mut released = 0;
        for (path, count) in &counts {
            if *count > 0 {
                continue;
            }
            if let Some(handle) = self.catalog.remove_description(path) {
                if let Err(err) = self.primary.unload_sample_data(handle) {
                    log::debug!("[Audio] unload_sample_data({}) failed: {}", path, err);
                }
                released += 1;
            }
        }

        if self.unload_unused_audio {
            for observer in self.observers.snapshot() {
                observer.on_unused_descriptions_released(&counts);
            }
        }
        released
    }

    /// Callback inherited by new instances of `description`. Observers
    /// still hear DESTROYED whatever `mask` says.
    pub fn set_description_callback(
        &mut self,
        description: DescriptionHandle,
        callback: Option<EventCallback>,
        mask: CallbackMask,
    ) -> EngineResult<()> {
        let (wrapped, mask) = wrap_callback(self.observers.clone(), callback, mask);
        self.primary
            .set_description_callback(description, Some(wrapped), mask)
    }

    // --- instances -------------------------------------------------------

    /// Create an instance in the primary and offer it for mirroring before
    /// the caller can mutate it.
    pub fn create_instance(&mut self, description: DescriptionHandle) -> EngineResult<InstanceHandle> {
        let scope = self.guard.try_enter(CREATE_KEY);
        let instance = self.primary.create_instance(description)?;
        tracing::trace!("[InstanceMirror] Created instance {}", instance);

        if scope.is_none() {
            return Ok(instance);
        }
        match self.primary.description_id(description) {
            Ok(id) => {
                for observer in self.observers.snapshot() {
                    observer.on_instance_created(self.primary.as_ref(), id, instance);
                }
            }
            Err(err) => tracing::debug!(
                "[InstanceMirror] No id for description {}: {}",
                description,
                err
            ),
        }
        Ok(instance)
    }

    /// Run `op` on the primary, then let observers replay it.
    ///
    /// The operation key is held across both, so an observer reentering
    /// the same operation reaches the primary but is not replayed again.
    fn mirror(&mut self, instance: InstanceHandle, op: InstanceOp) -> EngineResult<()> {
        let scope = self.guard.try_enter(op.key());
        tracing::trace!("[InstanceMirror] {} on {}", op.key(), instance);
        op.apply(self.primary.as_mut(), instance)?;

        if scope.is_some() {
            for observer in self.observers.snapshot() {
                observer.on_instance_mutated(instance, &op);
            }
        }
        Ok(())
    }

    pub fn start(&mut self, instance: InstanceHandle) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::Start)
    }

    pub fn stop(&mut self, instance: InstanceHandle, mode: StopMode) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::Stop(mode))
    }

    pub fn release_instance(&mut self, instance: InstanceHandle) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::Release)
    }

    pub fn trigger_cue(&mut self, instance: InstanceHandle) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::TriggerCue)
    }

    pub fn set_3d_attributes(
        &mut self,
        instance: InstanceHandle,
        attributes: Attributes3D,
    ) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::Set3DAttributes(attributes))
    }

    pub fn set_listener_mask(&mut self, instance: InstanceHandle, mask: u32) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::SetListenerMask(mask))
    }

    pub fn set_parameter_value(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        value: f32,
    ) -> EngineResult<()> {
        self.mirror(
            instance,
            InstanceOp::SetParameter {
                name: name.to_string(),
                value,
            },
        )
    }

    pub fn set_parameter_value_by_index(
        &mut self,
        instance: InstanceHandle,
        index: usize,
        value: f32,
    ) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::SetParameterByIndex { index, value })
    }

    pub fn set_parameter_values_by_indices(
        &mut self,
        instance: InstanceHandle,
        indices: &[usize],
        values: &[f32],
    ) -> EngineResult<()> {
        self.mirror(
            instance,
            InstanceOp::SetParametersByIndices {
                indices: indices.to_vec(),
                values: values.to_vec(),
            },
        )
    }

    pub fn set_paused(&mut self, instance: InstanceHandle, paused: bool) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::SetPaused(paused))
    }

    pub fn set_pitch(&mut self, instance: InstanceHandle, pitch: f32) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::SetPitch(pitch))
    }

    pub fn set_property(
        &mut self,
        instance: InstanceHandle,
        property: EventProperty,
        value: f32,
    ) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::SetProperty { property, value })
    }

    pub fn set_reverb_level(
        &mut self,
        instance: InstanceHandle,
        index: usize,
        level: f32,
    ) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::SetReverbLevel { index, level })
    }

    pub fn set_timeline_position(&mut self, instance: InstanceHandle, position: i32) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::SetTimelinePosition(position))
    }

    pub fn set_user_data(&mut self, instance: InstanceHandle, data: UserData) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::SetUserData(data))
    }

    pub fn set_volume(&mut self, instance: InstanceHandle, volume: f32) -> EngineResult<()> {
        self.mirror(instance, InstanceOp::SetVolume(volume))
    }

    /// Install `callback` on `instance`.
    ///
    /// The primary gets the wrapper so observers hear DESTROYED; shadows
    /// get the caller's callback as is.
    pub fn set_instance_callback(
        &mut self,
        instance: InstanceHandle,
        callback: Option<EventCallback>,
        mask: CallbackMask,
    ) -> EngineResult<()> {
        let op = InstanceOp::SetCallback {
            callback: callback.clone(),
            mask,
        };
        let scope = self.guard.try_enter(op.key());
        let (wrapped, wrapped_mask) = wrap_callback(self.observers.clone(), callback, mask);
        self.primary
            .set_instance_callback(instance, Some(wrapped), wrapped_mask)?;

        if scope.is_some() {
            for observer in self.observers.snapshot() {
                observer.on_instance_mutated(instance, &op);
            }
        }
        Ok(())
    }

    // --- buses, VCAs, listener -------------------------------------------

    /// Set the mute flag of bus `path` when `mute` is given; returns the
    /// primary's flag, `false` for a missing bus.
    pub fn bus_muted(&mut self, path: &str, mute: Option<bool>) -> bool {
        let Ok(bus) = self.primary.get_bus(path) else {
            return false;
        };
        if let Some(mute) = mute {
            match self.primary.bus_set_mute(bus, mute) {
                Ok(()) => {
                    for observer in self.observers.snapshot() {
                        observer.on_bus_mute(path, mute);
                    }
                }
                Err(err) => log::warn!("[Audio] Failed to mute bus {}: {}", path, err),
            }
        }
        self.primary.bus_get_mute(bus).unwrap_or(false)
    }

    pub fn bus_paused(&mut self, path: &str, paused: Option<bool>) -> bool {
        let Ok(bus) = self.primary.get_bus(path) else {
            return false;
        };
        if let Some(paused) = paused {
            match self.primary.bus_set_paused(bus, paused) {
                Ok(()) => {
                    for observer in self.observers.snapshot() {
                        observer.on_bus_paused(path, paused);
                    }
                }
                Err(err) => log::warn!("[Audio] Failed to pause bus {}: {}", path, err),
            }
        }
        self.primary.bus_get_paused(bus).unwrap_or(false)
    }

    pub fn bus_stop_all(&mut self, path: &str, immediate: bool) {
        let mode = StopMode::from_immediate(immediate);
        let result = self
            .primary
            .get_bus(path)
            .and_then(|bus| self.primary.bus_stop_all_events(bus, mode));
        match result {
            Ok(()) => {
                for observer in self.observers.snapshot() {
                    observer.on_bus_stop_all(path, mode);
                }
            }
            Err(err) => log::debug!("[Audio] stop_all on bus {} failed: {}", path, err),
        }
    }

    /// Set the volume of VCA `path` when `volume` is given; returns the
    /// primary's volume, `1.0` for a missing VCA.
    pub fn vca_volume(&mut self, path: &str, volume: Option<f32>) -> f32 {
        let Ok(vca) = self.primary.get_vca(path) else {
            return 1.0;
        };
        if let Some(volume) = volume {
            match self.primary.vca_set_volume(vca, volume) {
                Ok(()) => {
                    for observer in self.observers.snapshot() {
                        observer.on_vca_volume(path, volume);
                    }
                }
                Err(err) => log::warn!("[Audio] Failed to set VCA {} volume: {}", path, err),
            }
        }
        self.primary.vca_get_volume(vca).unwrap_or(1.0)
    }

    pub fn set_listener_position(&mut self, forward: Vector3, up: Vector3, position: Vector3) {
        let attributes = Attributes3D::from_pose(forward, up, position);
        if let Err(err) = self.primary.set_listener_attributes(0, attributes) {
            log::debug!("[Audio] Listener update failed: {}", err);
        }
        for observer in self.observers.snapshot() {
            observer.on_listener_moved(attributes);
        }
    }

    /// Route the primary to `device`.
    pub fn set_output_device(&mut self, device: &OutputDeviceInfo) -> EngineResult<()> {
        device.apply(self.primary.as_mut())
    }

    // --- frame -----------------------------------------------------------

    /// Pump the primary, then the observers. Secondary engines are pumped
    /// even when the primary reports an error.
    pub fn update(&mut self) -> EngineResult<()> {
        let result = self.primary.update();
        for observer in self.observers.snapshot() {
            observer.on_update();
        }
        result
    }

    /// Release the primary engine.
    pub fn release(&mut self) -> EngineResult<()> {
        self.primary.release()
    }
}
