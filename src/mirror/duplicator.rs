use std::collections::{BTreeSet, HashMap};

use crate::error::{log_mirror_error, EngineResult, MirrorError};
use crate::studio::{
    BankHandle, DescriptionHandle, EventId, EventProperty, InstanceHandle, StopMode, StudioSystem,
    REVERB_SENDS,
};

/// Primary-to-shadow instance mapping of one engine context.
///
/// At most one shadow exists per primary instance. A mapping is created by
/// [`duplicate_instance`](Self::duplicate_instance) and removed exactly once
/// by [`destroy_duplicate`](Self::destroy_duplicate).
#[derive(Debug, Default)]
pub struct InstanceDuplicator {
    active: bool,
    duplicates: HashMap<InstanceHandle, InstanceHandle>,
}

impl InstanceDuplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn len(&self) -> usize {
        self.duplicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.duplicates.is_empty()
    }

    pub fn clear(&mut self) {
        self.duplicates.clear();
    }

    pub fn get_duplicate(&self, primary: InstanceHandle) -> Option<InstanceHandle> {
        self.duplicates.get(&primary).copied()
    }

    /// Pairs of (primary, shadow), in no particular order.
    pub fn mappings(&self) -> Vec<(InstanceHandle, InstanceHandle)> {
        self.duplicates.iter().map(|(p, s)| (*p, *s)).collect()
    }

    /// Create a shadow of `instance` in `shadow` and copy its full state.
    ///
    /// An instance that is already mapped keeps its shadow. When the state
    /// copy fails the mapping is kept, so later mutations still reach the
    /// shadow, and the error is returned for logging.
    pub fn duplicate_instance(
        &mut self,
        shadow: &mut dyn StudioSystem,
        primary: &dyn StudioSystem,
        description_id: EventId,
        instance: InstanceHandle,
    ) -> Result<InstanceHandle, MirrorError> {
        if let Some(existing) = self.get_duplicate(instance) {
            return Ok(existing);
        }

        let target = primary
            .instance_description(instance)
            .and_then(|d| primary.description_path(d))
            .unwrap_or_else(|_| description_id.to_string());

        let duplicate = create_shadow(shadow, description_id).map_err(|source| {
            MirrorError::InstanceCreateFailed {
                target: target.clone(),
                primary: instance,
                source,
            }
        })?;

        self.duplicates.insert(instance, duplicate);
        tracing::debug!(
            "[InstanceDuplicator] Created duplicate {}, orig={}, duplicate={}",
            target,
            instance,
            duplicate
        );

        copy_instance_state(primary, instance, shadow, duplicate)
            .map_err(|source| MirrorError::engine(format!("copy state of {}", target), source))?;
        Ok(duplicate)
    }

    /// Release the shadow of `instance` and forget the mapping.
    ///
    /// Returns `false` when nothing was mapped, which makes a redelivered
    /// destroy notification harmless.
    pub fn destroy_duplicate(&mut self, shadow: &mut dyn StudioSystem, instance: InstanceHandle) -> bool {
        let Some(duplicate) = self.duplicates.remove(&instance) else {
            return false;
        };
        if let Err(err) = shadow.release_instance(duplicate) {
            tracing::debug!(
                "[InstanceDuplicator] Releasing duplicate {} failed: {}",
                duplicate,
                err
            );
        }
        tracing::debug!("[InstanceDuplicator] Destroyed duplicate of {}", instance);
        true
    }

    /// Duplicate every live primary instance of every description in
    /// `banks`. Descriptions shared between banks are visited once.
    /// Returns the number of instances mapped afterwards.
    pub fn duplicate_existing_instances(
        &mut self,
        shadow: &mut dyn StudioSystem,
        primary: &dyn StudioSystem,
        banks: &[BankHandle],
    ) -> usize {
        let mut descriptions: BTreeSet<DescriptionHandle> = BTreeSet::new();
        for bank in banks {
            match primary.bank_event_list(*bank) {
                Ok(list) => descriptions.extend(list),
                Err(err) => log::warn!(
                    "[InstanceDuplicator] Failed to list events of bank {}: {}",
                    bank,
                    err
                ),
            }
        }

        for description in descriptions {
            let listed = primary
                .description_id(description)
                .and_then(|id| Ok((id, primary.description_instance_list(description)?)));
            let (id, instances) = match listed {
                Ok(listed) => listed,
                Err(err) => {
                    log::warn!(
                        "[InstanceDuplicator] Failed to enumerate instances of {}: {}",
                        description,
                        err
                    );
                    continue;
                }
            };
            for instance in instances {
                if let Err(err) = self.duplicate_instance(shadow, primary, id, instance) {
                    log_mirror_error(&err, "InstanceDuplicator::duplicate_existing_instances");
                }
            }
        }
        self.duplicates.len()
    }
}

fn create_shadow(shadow: &mut dyn StudioSystem, id: EventId) -> EngineResult<InstanceHandle> {
    let description = shadow.get_event_by_id(id)?;
    shadow.load_sample_data(description)?;
    shadow.create_instance(description)
}

/// Copy everything observable about `from` onto `to`, transport last.
fn copy_instance_state(
    primary: &dyn StudioSystem,
    from: InstanceHandle,
    shadow: &mut dyn StudioSystem,
    to: InstanceHandle,
) -> EngineResult<()> {
    shadow.set_pitch(to, primary.get_pitch(from)?)?;
    shadow.set_timeline_position(to, primary.get_timeline_position(from)?)?;
    shadow.set_volume(to, primary.get_volume(from)?)?;
    shadow.set_3d_attributes(to, primary.get_3d_attributes(from)?)?;
    shadow.set_listener_mask(to, primary.get_listener_mask(from)?)?;
    shadow.set_user_data(to, primary.get_user_data(from)?)?;
    shadow.set_paused(to, primary.get_paused(from)?)?;
    for index in 0..REVERB_SENDS {
        shadow.set_reverb_level(to, index, primary.get_reverb_level(from, index)?)?;
    }

    let count = shadow.description_parameter_count(shadow.instance_description(to)?)?;
    let indices: Vec<usize> = (0..count).collect();
    let values = indices
        .iter()
        .map(|index| primary.get_parameter_value_by_index(from, *index))
        .collect::<EngineResult<Vec<f32>>>()?;
    shadow.set_parameter_values_by_indices(to, &indices, &values)?;

    for property in EventProperty::ALL {
        shadow.set_property(to, property, primary.get_property(from, property)?)?;
    }

    if primary.playback_state(from)?.is_audible() {
        shadow.start(to)
    } else {
        shadow.stop(to, StopMode::Immediate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio::{
        Attributes3D, BankLibrary, MemoryStudioSystem, PlaybackState, UserData, Vector3,
    };
    use std::path::Path;
    use std::sync::Arc;

    struct Pair {
        primary: MemoryStudioSystem,
        shadow: MemoryStudioSystem,
        banks: Vec<BankHandle>,
    }

    fn pair() -> Pair {
        let library = Arc::new(BankLibrary::demo());
        let mut primary = MemoryStudioSystem::new(Arc::clone(&library));
        let mut shadow = MemoryStudioSystem::new(library);
        let mut banks = Vec::new();
        for file in ["music.bank", "sfx.bank"] {
            let path = Path::new("Content/FMOD/Desktop").join(file);
            banks.push(primary.load_bank_file(&path).unwrap());
            shadow.load_bank_file(&path).unwrap();
        }
        Pair {
            primary,
            shadow,
            banks,
        }
    }

    fn spawn(sys: &mut MemoryStudioSystem, path: &str) -> (EventId, InstanceHandle) {
        let desc = sys.get_event(path).unwrap();
        let id = sys.description_id(desc).unwrap();
        (id, sys.create_instance(desc).unwrap())
    }

    #[test]
    fn test_duplicate_copies_full_state() {
        let mut p = pair();
        let (id, inst) = spawn(&mut p.primary, "event:/music/lvl1");
        p.primary.set_volume(inst, 0.8).unwrap();
        p.primary.set_pitch(inst, 1.25).unwrap();
        p.primary.set_timeline_position(inst, 1500).unwrap();
        p.primary.set_listener_mask(inst, 0b101).unwrap();
        p.primary.set_user_data(inst, UserData(42)).unwrap();
        let attrs = Attributes3D::from_pose(
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(3.0, 4.0, 5.0),
        );
        p.primary.set_3d_attributes(inst, attrs).unwrap();
        p.primary.set_parameter_value_by_index(inst, 1, 0.6).unwrap();
        p.primary
            .set_property(inst, EventProperty::MaximumDistance, 40.0)
            .unwrap();
        p.primary.set_paused(inst, true).unwrap();
        p.primary.set_reverb_level(inst, 0, 0.5).unwrap();
        p.primary.start(inst).unwrap();

        let mut dup = InstanceDuplicator::new();
        let shadow = dup
            .duplicate_instance(&mut p.shadow, &p.primary, id, inst)
            .unwrap();

        assert_eq!(p.shadow.get_volume(shadow).unwrap(), 0.8);
        assert!(p.shadow.get_paused(shadow).unwrap());
        assert_eq!(p.shadow.get_reverb_level(shadow, 0).unwrap(), 0.5);
        assert_eq!(p.shadow.get_pitch(shadow).unwrap(), 1.25);
        assert_eq!(p.shadow.get_timeline_position(shadow).unwrap(), 1500);
        assert_eq!(p.shadow.get_listener_mask(shadow).unwrap(), 0b101);
        assert_eq!(p.shadow.get_user_data(shadow).unwrap(), UserData(42));
        assert_eq!(p.shadow.get_3d_attributes(shadow).unwrap(), attrs);
        assert_eq!(p.shadow.get_parameter_value_by_index(shadow, 1).unwrap(), 0.6);
        assert_eq!(
            p.shadow
                .get_property(shadow, EventProperty::MaximumDistance)
                .unwrap(),
            40.0
        );
        assert_eq!(p.shadow.playback_state(shadow).unwrap(), PlaybackState::Playing);
    }

    #[test]
    fn test_duplicate_keeps_position_of_playing_primary() {
        let mut p = pair();
        let (id, inst) = spawn(&mut p.primary, "event:/music/lvl2");
        p.primary.start(inst).unwrap();
        p.primary.set_timeline_position(inst, 1500).unwrap();
        p.primary.set_paused(inst, true).unwrap();
        p.primary.set_reverb_level(inst, 2, 0.35).unwrap();

        let mut dup = InstanceDuplicator::new();
        let shadow = dup
            .duplicate_instance(&mut p.shadow, &p.primary, id, inst)
            .unwrap();

        assert_eq!(p.primary.get_timeline_position(inst).unwrap(), 1500);
        assert_eq!(p.shadow.get_timeline_position(shadow).unwrap(), 1500);
        assert!(p.shadow.get_paused(shadow).unwrap());
        assert_eq!(p.shadow.get_reverb_level(shadow, 2).unwrap(), 0.35);
        assert_eq!(p.shadow.playback_state(shadow).unwrap(), PlaybackState::Playing);
    }

    #[test]
    fn test_stopped_primary_yields_stopped_shadow() {
        let mut p = pair();
        let (id, inst) = spawn(&mut p.primary, "event:/sfx/jump");
        let mut dup = InstanceDuplicator::new();
        let shadow = dup
            .duplicate_instance(&mut p.shadow, &p.primary, id, inst)
            .unwrap();
        assert_eq!(p.shadow.playback_state(shadow).unwrap(), PlaybackState::Stopped);
    }

    #[test]
    fn test_second_duplicate_reuses_shadow() {
        let mut p = pair();
        let (id, inst) = spawn(&mut p.primary, "event:/sfx/dash");
        let mut dup = InstanceDuplicator::new();
        let first = dup
            .duplicate_instance(&mut p.shadow, &p.primary, id, inst)
            .unwrap();
        let second = dup
            .duplicate_instance(&mut p.shadow, &p.primary, id, inst)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(dup.len(), 1);
    }

    #[test]
    fn test_unknown_description_fails_without_mapping() {
        let mut p = pair();
        let (_, inst) = spawn(&mut p.primary, "event:/sfx/dash");
        let mut dup = InstanceDuplicator::new();
        let err = dup
            .duplicate_instance(&mut p.shadow, &p.primary, EventId::nil(), inst)
            .unwrap_err();
        assert!(matches!(err, MirrorError::InstanceCreateFailed { .. }));
        assert!(dup.get_duplicate(inst).is_none());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut p = pair();
        let (id, inst) = spawn(&mut p.primary, "event:/music/lvl1");
        let mut dup = InstanceDuplicator::new();
        let shadow = dup
            .duplicate_instance(&mut p.shadow, &p.primary, id, inst)
            .unwrap();

        assert!(dup.destroy_duplicate(&mut p.shadow, inst));
        assert!(!dup.destroy_duplicate(&mut p.shadow, inst));
        assert!(dup.get_duplicate(inst).is_none());

        p.shadow.update().unwrap();
        assert!(p.shadow.playback_state(shadow).is_err());
    }

    #[test]
    fn test_duplicate_existing_instances_across_banks() {
        let mut p = pair();
        let mut primaries = Vec::new();
        for path in [
            "event:/music/lvl1",
            "event:/music/lvl1",
            "event:/music/menu",
            "event:/sfx/jump",
            "event:/ui/confirm",
        ] {
            let (_, inst) = spawn(&mut p.primary, path);
            primaries.push(inst);
        }

        let mut dup = InstanceDuplicator::new();
        let mut banks = p.banks.clone();
        banks.push(p.banks[0]);
        let mapped = dup.duplicate_existing_instances(&mut p.shadow, &p.primary, &banks);

        assert_eq!(mapped, primaries.len());
        let shadows: BTreeSet<InstanceHandle> =
            dup.mappings().into_iter().map(|(_, s)| s).collect();
        assert_eq!(shadows.len(), primaries.len());
        for inst in primaries {
            assert!(dup.get_duplicate(inst).is_some());
        }
    }

    #[test]
    fn test_activation_flag() {
        let mut dup = InstanceDuplicator::new();
        assert!(!dup.is_active());
        dup.activate();
        assert!(dup.is_active());
        dup.deactivate();
        assert!(!dup.is_active());
    }
}
