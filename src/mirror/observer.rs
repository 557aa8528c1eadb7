use std::sync::{Arc, PoisonError, RwLock};

use crate::context::EngineContext;
use crate::studio::{Attributes3D, EventId, InstanceHandle, StopMode, StudioSystem};

use super::bank_cache::BankRecord;
use super::ops::InstanceOp;

/// Receives everything the host does to the primary engine, after the
/// primary call has completed successfully.
///
/// Only the three instance notifications are mandatory; the host-level
/// notifications default to no-ops.
pub trait AudioEngineObserver: Send + Sync {
    fn on_instance_created(
        &self,
        primary: &dyn StudioSystem,
        description_id: EventId,
        instance: InstanceHandle,
    );

    fn on_instance_mutated(&self, instance: InstanceHandle, op: &InstanceOp);

    fn on_instance_destroyed(&self, instance: InstanceHandle);

    fn on_bank_loaded(&self, _bank: &BankRecord) {}

    fn on_description_resolved(&self, _path: &str, _id: Option<EventId>) {}

    fn on_unused_descriptions_released(&self, _primary_counts: &[(String, usize)]) {}

    fn on_bus_mute(&self, _path: &str, _mute: bool) {}

    fn on_bus_paused(&self, _path: &str, _paused: bool) {}

    fn on_bus_stop_all(&self, _path: &str, _mode: StopMode) {}

    fn on_vca_volume(&self, _path: &str, _volume: f32) {}

    fn on_listener_moved(&self, _attributes: Attributes3D) {}

    fn on_update(&self) {}
}

/// Shared, ordered list of observers.
///
/// Cloning shares the list, so callback wrappers created earlier see
/// observers added later.
#[derive(Clone, Default)]
pub struct ObserverList {
    inner: Arc<RwLock<Vec<Arc<dyn AudioEngineObserver>>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn AudioEngineObserver>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Remove `observer`, compared by identity. Returns whether it was present.
    pub fn remove(&self, observer: &Arc<dyn AudioEngineObserver>) -> bool {
        let mut observers = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        let target = Arc::as_ptr(observer) as *const ();
        observers.retain(|o| Arc::as_ptr(o) as *const () != target);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current observers. The lock is released before any observer runs,
    /// so observers may add or remove observers.
    pub fn snapshot(&self) -> Vec<Arc<dyn AudioEngineObserver>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Engine contexts receiving mirrored operations.
///
/// Owned by the top-level handle and installed into the host adapter as
/// one observer; every notification fans out to each registered context.
#[derive(Default)]
pub struct MirrorRegistry {
    contexts: RwLock<Vec<Arc<EngineContext>>>,
}

impl MirrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, context: Arc<EngineContext>) {
        let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
        if contexts.iter().any(|c| Arc::ptr_eq(c, &context)) {
            return;
        }
        log::debug!("[MirrorRegistry] Registered context {}", context.name());
        contexts.push(context);
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<EngineContext>> {
        let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
        let index = contexts.iter().position(|c| c.name() == name)?;
        Some(contexts.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<Arc<EngineContext>> {
        self.contexts()
            .into_iter()
            .find(|context| context.name() == name)
    }

    pub fn contexts(&self) -> Vec<Arc<EngineContext>> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Contexts with a live secondary engine.
    pub fn ready_contexts(&self) -> Vec<Arc<EngineContext>> {
        self.contexts()
            .into_iter()
            .filter(|context| context.is_ready())
            .collect()
    }
}

impl AudioEngineObserver for MirrorRegistry {
    fn on_instance_created(
        &self,
        primary: &dyn StudioSystem,
        description_id: EventId,
        instance: InstanceHandle,
    ) {
        for context in self.ready_contexts() {
            context.duplicate_instance(primary, description_id, instance);
        }
    }

    fn on_instance_mutated(&self, instance: InstanceHandle, op: &InstanceOp) {
        for context in self.ready_contexts() {
            context.replay(instance, op);
        }
    }

    fn on_instance_destroyed(&self, instance: InstanceHandle) {
        for context in self.contexts() {
            context.destroy_duplicate(instance);
        }
    }

    fn on_bank_loaded(&self, bank: &BankRecord) {
        for context in self.ready_contexts() {
            context.load_bank(bank);
        }
    }

    fn on_description_resolved(&self, path: &str, id: Option<EventId>) {
        for context in self.ready_contexts() {
            context.load_event_description(path, id);
        }
    }

    fn on_unused_descriptions_released(&self, primary_counts: &[(String, usize)]) {
        for context in self.ready_contexts() {
            context.release_unused_descriptions(primary_counts);
        }
    }

    fn on_bus_mute(&self, path: &str, mute: bool) {
        for context in self.ready_contexts() {
            context.bus_muted(path, Some(mute));
        }
    }

    fn on_bus_paused(&self, path: &str, paused: bool) {
        for context in self.ready_contexts() {
            context.bus_paused(path, Some(paused));
        }
    }

    fn on_bus_stop_all(&self, path: &str, mode: StopMode) {
        for context in self.ready_contexts() {
            context.bus_stop_all(path, mode);
        }
    }

    fn on_vca_volume(&self, path: &str, volume: f32) {
        for context in self.ready_contexts() {
            context.vca_volume(path, Some(volume));
        }
    }

    fn on_listener_moved(&self, attributes: Attributes3D) {
        for context in self.contexts() {
            context.set_listener_position(attributes);
        }
    }

    fn on_update(&self) {
        for context in self.ready_contexts() {
            context.update();
        }
    }
}
