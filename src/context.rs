// EngineContext: one secondary engine mirroring the primary
//
// Owns the secondary engine, its bank and description caches and its
// instance duplicator. Created inert; initialize() allocates and populates,
// terminate() tears down. Every passthrough is a no-op while not ready.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::EngineSettings;
use crate::devices::OutputDeviceInfo;
use crate::error::{log_mirror_error, ErrorCode, MirrorError};
use crate::mirror::{
    BankCache, BankLocator, BankRecord, EventDescriptionCache, InstanceDuplicator, InstanceOp,
    PrimarySnapshot, PrimaryView,
};
use crate::studio::{Attributes3D, EventId, InstanceHandle, StopMode, StudioSystem, SystemFactory};
use crate::telemetry::{self, LifecyclePhase};

/// Everything that exists only while the context is initialized
struct ContextState {
    system: Box<dyn StudioSystem>,
    banks: BankCache,
    events: EventDescriptionCache,
    duplicator: InstanceDuplicator,
}

/// A populated secondary engine not yet installed into its context.
///
/// Built off the frame thread by [`EngineContext::prepare`]; holds no
/// instance mapping yet.
pub struct PreparedContext {
    name: String,
    state: ContextState,
}

impl PreparedContext {
    pub fn bank_names(&self) -> Vec<String> {
        self.state.banks.names()
    }

    pub fn description_count(&self) -> usize {
        self.state.events.len()
    }

    /// Release the engine without installing it.
    pub fn discard(self) {
        shut_down(&self.name, self.state);
    }
}

/// A secondary engine taken out of its context, waiting to be shut down.
///
/// The context is already not ready; shutting down may run on any thread.
pub struct DetachedContext {
    name: String,
    state: ContextState,
}

impl DetachedContext {
    /// Unload banks, clear caches and release the engine.
    pub fn shutdown(self) {
        shut_down(&self.name, self.state);
        telemetry::hub().record_lifecycle(&self.name, LifecyclePhase::Terminated);
    }
}

fn shut_down(name: &str, state: ContextState) {
    let ContextState {
        mut system,
        mut banks,
        mut events,
        ..
    } = state;
    if let Err(err) = events.unload_all(system.as_mut()) {
        log::debug!("[EngineContext] {}: unloading sample data failed: {}", name, err);
    }
    banks.unload_banks(system.as_mut());
    if let Err(err) = system.release() {
        log::warn!("[EngineContext] {}: releasing engine failed: {}", name, err);
    }
    log::info!("[EngineContext] {} terminated", name);
}

/// Point-in-time view of a context, for tests and the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStats {
    pub name: String,
    pub ready: bool,
    pub banks: Vec<String>,
    pub descriptions: Vec<String>,
    pub mappings: usize,
    pub device: OutputDeviceInfo,
}

/// One secondary engine and the state mirrored into it
///
/// All methods take `&self`; the state sits behind a mutex that is never
/// held while the primary engine runs, so primary callbacks may call back
/// into the context.
pub struct EngineContext {
    name: String,
    factory: Arc<dyn SystemFactory>,
    locator: Arc<dyn BankLocator>,
    settings: EngineSettings,
    state: Mutex<Option<ContextState>>,
    listener: Mutex<Attributes3D>,
    device: Mutex<OutputDeviceInfo>,
}

impl EngineContext {
    /// Create an inert context. Nothing is allocated until `initialize`.
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn SystemFactory>,
        locator: Arc<dyn BankLocator>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            locator,
            settings,
            state: Mutex::new(None),
            listener: Mutex::new(Attributes3D::default()),
            device: Mutex::new(OutputDeviceInfo::default_device()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // LOCK HELPERS
    // ========================================================================

    fn lock_state(&self) -> Result<MutexGuard<'_, Option<ContextState>>, MirrorError> {
        self.state.lock().map_err(|_| {
            log::error!("[EngineContext] {} state lock poisoned", self.name);
            MirrorError::LockPoisoned {
                component: format!("engine_context.{}", self.name),
            }
        })
    }

    /// Run `f` on the live state. `None` when not ready.
    fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> Option<R> {
        let mut guard = self.lock_state().ok()?;
        guard.as_mut().map(f)
    }

    pub fn is_ready(&self) -> bool {
        self.lock_state().map(|state| state.is_some()).unwrap_or(false)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Initialize synchronously. Idempotent.
    pub fn initialize(&self, primary: PrimaryView<'_>) -> Result<(), MirrorError> {
        if self.is_ready() {
            return Ok(());
        }
        telemetry::hub().record_lifecycle(&self.name, LifecyclePhase::Enabling);
        let prepared = self.prepare(&primary.snapshot())?;
        self.install(prepared, primary)
    }

    /// Allocate a secondary engine and load what `snapshot` lists.
    ///
    /// Touches neither the primary nor the context state, so it can run on
    /// a worker thread.
    pub fn prepare(&self, snapshot: &PrimarySnapshot) -> Result<PreparedContext, MirrorError> {
        let result = self.build_state(snapshot);
        if let Err(err) = &result {
            log_mirror_error(err, &format!("{}::prepare", self.name));
            telemetry::hub().record_lifecycle(&self.name, LifecyclePhase::InitializeFailed);
        }
        result.map(|state| PreparedContext {
            name: self.name.clone(),
            state,
        })
    }

    fn build_state(&self, snapshot: &PrimarySnapshot) -> Result<ContextState, MirrorError> {
        let mut system = self
            .factory
            .create(&self.settings)
            .map_err(|source| MirrorError::engine("create secondary engine", source))?;
        system
            .set_listener_attributes(0, Attributes3D::default())
            .map_err(|source| MirrorError::engine("reset listener", source))?;

        let mut state = ContextState {
            system,
            banks: BankCache::new(),
            events: EventDescriptionCache::new(),
            duplicator: InstanceDuplicator::new(),
        };
        self.catch_up(&mut state, snapshot);
        log::info!(
            "[EngineContext] {} prepared: {} banks, {} descriptions",
            self.name,
            state.banks.len(),
            state.events.len()
        );
        Ok(state)
    }

    /// Load banks and descriptions from `snapshot` that `state` lacks.
    fn catch_up(&self, state: &mut ContextState, snapshot: &PrimarySnapshot) {
        let loaded = state.banks.load_unloaded_banks(
            state.system.as_mut(),
            self.locator.as_ref(),
            &snapshot.banks,
        );
        for name in loaded {
            let strings = state.banks.entry(&name).is_some_and(|e| e.load_strings);
            telemetry::hub().record_bank_loaded(&self.name, &name, strings);
        }
        state
            .events
            .load_used_descriptions(state.system.as_mut(), &snapshot.descriptions);
    }

    /// Finish initialization on the frame thread.
    ///
    /// Catches up on banks and descriptions the primary gained since the
    /// snapshot, recovers every live primary instance, then activates. If
    /// the context became ready meanwhile, `prepared` is discarded.
    pub fn install(
        &self,
        prepared: PreparedContext,
        primary: PrimaryView<'_>,
    ) -> Result<(), MirrorError> {
        let mut guard = self.lock_state()?;
        if guard.is_some() {
            drop(guard);
            log::debug!("[EngineContext] {} already initialized, discarding", self.name);
            prepared.discard();
            return Ok(());
        }

        let mut state = prepared.state;
        self.catch_up(&mut state, &primary.snapshot());

        let mapped = state.duplicator.duplicate_existing_instances(
            state.system.as_mut(),
            primary.system,
            &primary.catalog.bank_handles(),
        );
        state.duplicator.activate();

        let listener = *self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = state.system.set_listener_attributes(0, listener) {
            log::debug!("[EngineContext] {}: listener catch-up failed: {}", self.name, err);
        }
        let device = self.device();
        self.bind_device(state.system.as_mut(), &device);

        *guard = Some(state);
        drop(guard);

        log::info!(
            "[EngineContext] {} initialized, {} existing instances mirrored",
            self.name,
            mapped
        );
        telemetry::hub().record_lifecycle(&self.name, LifecyclePhase::Initialized);
        Ok(())
    }

    /// Take the live state out, leaving the context not ready.
    ///
    /// The duplicator is deactivated and its mapping cleared here so no
    /// shadow lookup can race the shutdown. `Ok(None)` when not ready.
    pub fn detach(&self) -> Result<Option<DetachedContext>, MirrorError> {
        let Some(mut state) = self.lock_state()?.take() else {
            return Ok(None);
        };
        state.duplicator.deactivate();
        state.duplicator.clear();
        telemetry::hub().record_lifecycle(&self.name, LifecyclePhase::Disabling);
        Ok(Some(DetachedContext {
            name: self.name.clone(),
            state,
        }))
    }

    /// Tear down synchronously. Idempotent.
    pub fn terminate(&self) -> Result<(), MirrorError> {
        if let Some(detached) = self.detach()? {
            detached.shutdown();
        }
        Ok(())
    }

    /// Pump the secondary engine. Never fails.
    pub fn update(&self) {
        self.with_state(|state| {
            if let Err(err) = state.system.update() {
                log::warn!("[EngineContext] {} update failed: {}", self.name, err);
            }
        });
    }

    // ========================================================================
    // INSTANCES
    // ========================================================================

    /// Create the shadow of a freshly created primary instance.
    pub fn duplicate_instance(
        &self,
        primary: &dyn StudioSystem,
        description_id: EventId,
        instance: InstanceHandle,
    ) {
        self.with_state(|state| {
            if !state.duplicator.is_active() || state.duplicator.get_duplicate(instance).is_some() {
                return;
            }
            match state.duplicator.duplicate_instance(
                state.system.as_mut(),
                primary,
                description_id,
                instance,
            ) {
                Ok(shadow) => {
                    telemetry::hub().record_duplicate(&self.name, instance.raw(), shadow.raw())
                }
                Err(err) => {
                    log_mirror_error(&err, &format!("{}::duplicate_instance", self.name));
                    telemetry::hub().record_error(&err, self.name.as_str());
                }
            }
        });
    }

    /// Replay `op` on the shadow of `instance`.
    ///
    /// Returns whether a shadow was found and accepted the call. Unmapped
    /// instances are skipped silently.
    pub fn replay(&self, instance: InstanceHandle, op: &InstanceOp) -> bool {
        self.with_state(|state| {
            if !state.duplicator.is_active() {
                return false;
            }
            let Some(shadow) = state.duplicator.get_duplicate(instance) else {
                return false;
            };
            match op.apply(state.system.as_mut(), shadow) {
                Ok(()) => {
                    tracing::trace!(
                        "[EngineContext] {} replayed {} on {} (orig={})",
                        self.name,
                        op.key(),
                        shadow,
                        instance
                    );
                    telemetry::hub().record_replay();
                    true
                }
                Err(err) => {
                    tracing::debug!(
                        "[EngineContext] {} replay {} on {} failed, orig={}, code={}: {}",
                        self.name,
                        op.key(),
                        shadow,
                        instance,
                        err.code(),
                        err
                    );
                    telemetry::hub().record_replay_failure(&self.name, op.key(), &err);
                    false
                }
            }
        })
        .unwrap_or(false)
    }

    /// Release the shadow of a destroyed primary instance. Returns `false`
    /// when nothing was mapped.
    pub fn destroy_duplicate(&self, instance: InstanceHandle) -> bool {
        self.with_state(|state| {
            let destroyed = state
                .duplicator
                .destroy_duplicate(state.system.as_mut(), instance);
            if destroyed {
                telemetry::hub().record_destroyed(&self.name, instance.raw());
            }
            destroyed
        })
        .unwrap_or(false)
    }

    /// Shadow of `instance`, if any. Absence is normal.
    pub fn shadow_instance(&self, instance: InstanceHandle) -> Option<InstanceHandle> {
        self.with_state(|state| state.duplicator.get_duplicate(instance))
            .flatten()
    }

    // ========================================================================
    // BANKS AND DESCRIPTIONS
    // ========================================================================

    pub fn load_bank(&self, bank: &BankRecord) {
        self.with_state(|state| {
            if state.banks.contains(&bank.name) {
                return;
            }
            match state
                .banks
                .load_bank(state.system.as_mut(), self.locator.as_ref(), bank)
            {
                Ok(_) => {
                    telemetry::hub().record_bank_loaded(&self.name, &bank.name, bank.load_strings)
                }
                Err(err) => log_mirror_error(&err, &format!("{}::load_bank", self.name)),
            }
        });
    }

    pub fn load_event_description(&self, path: &str, id: Option<EventId>) {
        self.with_state(|state| {
            if let Err(err) = state
                .events
                .load_event_description(state.system.as_mut(), path, id)
            {
                log_mirror_error(&err, &format!("{}::load_event_description", self.name));
            }
        });
    }

    pub fn release_unused_descriptions(&self, primary_counts: &[(String, usize)]) {
        self.with_state(|state| {
            state
                .events
                .release_unused_descriptions(state.system.as_mut(), primary_counts)
        });
    }

    // ========================================================================
    // PASSTHROUGHS
    // ========================================================================

    /// Set the mute flag of bus `path` when `mute` is given. Returns the
    /// shadow bus state, `None` when not ready or the bus is missing.
    pub fn bus_muted(&self, path: &str, mute: Option<bool>) -> Option<bool> {
        self.with_state(|state| {
            let bus = state.system.get_bus(path).ok()?;
            if let Some(mute) = mute {
                if let Err(err) = state.system.bus_set_mute(bus, mute) {
                    log::debug!("[EngineContext] {} bus {} set_mute failed: {}", self.name, path, err);
                }
            }
            state.system.bus_get_mute(bus).ok()
        })
        .flatten()
    }

    pub fn bus_paused(&self, path: &str, paused: Option<bool>) -> Option<bool> {
        self.with_state(|state| {
            let bus = state.system.get_bus(path).ok()?;
            if let Some(paused) = paused {
                if let Err(err) = state.system.bus_set_paused(bus, paused) {
                    log::debug!(
                        "[EngineContext] {} bus {} set_paused failed: {}",
                        self.name,
                        path,
                        err
                    );
                }
            }
            state.system.bus_get_paused(bus).ok()
        })
        .flatten()
    }

    pub fn bus_stop_all(&self, path: &str, mode: StopMode) {
        self.with_state(|state| {
            let result = state
                .system
                .get_bus(path)
                .and_then(|bus| state.system.bus_stop_all_events(bus, mode));
            if let Err(err) = result {
                log::debug!("[EngineContext] {} bus {} stop_all failed: {}", self.name, path, err);
            }
        });
    }

    /// Set the volume of VCA `path` when `volume` is given. Returns the
    /// shadow VCA volume.
    pub fn vca_volume(&self, path: &str, volume: Option<f32>) -> Option<f32> {
        self.with_state(|state| {
            let vca = state.system.get_vca(path).ok()?;
            if let Some(volume) = volume {
                if let Err(err) = state.system.vca_set_volume(vca, volume) {
                    log::debug!("[EngineContext] {} vca {} set_volume failed: {}", self.name, path, err);
                }
            }
            state.system.vca_get_volume(vca).ok()
        })
        .flatten()
    }

    /// Remember the listener pose and apply it when ready. A context that
    /// initializes later starts from the last pose.
    pub fn set_listener_position(&self, attributes: Attributes3D) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = attributes;
        self.with_state(|state| {
            if let Err(err) = state.system.set_listener_attributes(0, attributes) {
                log::debug!("[EngineContext] {} listener update failed: {}", self.name, err);
            }
        });
    }

    // ========================================================================
    // OUTPUT DEVICE
    // ========================================================================

    pub fn device(&self) -> OutputDeviceInfo {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Select the output device; rebinds right away when ready.
    pub fn set_device(&self, device: &OutputDeviceInfo) {
        *self.device.lock().unwrap_or_else(PoisonError::into_inner) = device.clone();
        self.with_state(|state| self.bind_device(state.system.as_mut(), device));
    }

    fn bind_device(&self, system: &mut dyn StudioSystem, device: &OutputDeviceInfo) {
        match device.apply(system) {
            Ok(()) => {
                log::info!("[EngineContext] {} bound to {}", self.name, device.label());
                telemetry::hub().record_device_bound(&self.name, device.label(), false);
            }
            Err(err) => {
                log::warn!(
                    "[EngineContext] {} failed to bind {} ({}), falling back to default: {}",
                    self.name,
                    device.label(),
                    device.id,
                    err
                );
                let fallback = OutputDeviceInfo::default_device();
                if let Err(err) = fallback.apply(system) {
                    log::error!(
                        "[EngineContext] {} failed to bind default device: {}",
                        self.name,
                        err
                    );
                }
                telemetry::hub().record_device_bound(&self.name, fallback.label(), true);
            }
        }
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Read-only access to the secondary engine.
    pub fn inspect<R>(&self, f: impl FnOnce(&dyn StudioSystem) -> R) -> Option<R> {
        self.with_state(|state| f(state.system.as_ref()))
    }

    pub fn stats(&self) -> ContextStats {
        let live = self.with_state(|state| {
            (
                state.banks.names(),
                state.events.paths(),
                state.duplicator.len(),
            )
        });
        let ready = live.is_some();
        let (banks, descriptions, mappings) = live.unwrap_or_default();
        ContextStats {
            name: self.name.clone(),
            ready,
            banks,
            descriptions,
            mappings,
            device: self.device(),
        }
    }
}
