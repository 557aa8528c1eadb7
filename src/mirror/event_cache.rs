use std::collections::BTreeMap;

use crate::error::{log_mirror_error, EngineResult, MirrorError};
use crate::studio::{parse_guid_path, DescriptionHandle, EventId, StudioSystem};

/// Paths that stand for "no sound" and are expected to be missing.
const SILENT_PATHS: [&str; 2] = ["null", "event:/none"];

/// Whether a failed lookup of `path` deserves a warning.
pub fn is_silent_path(path: &str) -> bool {
    SILENT_PATHS.contains(&path)
}

/// Event descriptions resolved in one secondary engine, with their sample
/// data pinned, keyed by the path (or `guid://` reference) the host used.
#[derive(Debug, Default)]
pub struct EventDescriptionCache {
    entries: BTreeMap<String, DescriptionHandle>,
}

impl EventDescriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<DescriptionHandle> {
        self.entries.get(path).copied()
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve `path` in `system` and cache it.
    ///
    /// `known_id` is the id of the description the primary already resolved
    /// for this path and takes precedence over parsing the path. A missing
    /// event yields `Ok(None)`.
    pub fn load_event_description(
        &mut self,
        system: &mut dyn StudioSystem,
        path: &str,
        known_id: Option<EventId>,
    ) -> Result<Option<DescriptionHandle>, MirrorError> {
        if path.is_empty() {
            return Ok(None);
        }
        if let Some(handle) = self.get(path) {
            return Ok(Some(handle));
        }

        let resolved = match known_id.or_else(|| parse_guid_path(path)) {
            Some(id) => system.get_event_by_id(id),
            None => system.get_event(path),
        };

        match resolved {
            Ok(handle) => {
                system
                    .load_sample_data(handle)
                    .map_err(|source| MirrorError::engine("description.load_sample_data", source))?;
                self.entries.insert(path.to_string(), handle);
                tracing::trace!("[EventCache] Cached {} as {}", path, handle);
                Ok(Some(handle))
            }
            Err(err) if err.is_not_found() => {
                if !is_silent_path(path) {
                    log::warn!("[EventCache] Event not found: {}", path);
                }
                Ok(None)
            }
            Err(source) => Err(MirrorError::DescriptionUnresolved {
                target: path.to_string(),
                source,
            }),
        }
    }

    /// Resolve every description the primary holds. Returns how many are
    /// cached afterwards.
    pub fn load_used_descriptions(
        &mut self,
        system: &mut dyn StudioSystem,
        used: &[(String, EventId)],
    ) -> usize {
        for (path, id) in used {
            if let Err(err) = self.load_event_description(system, path, Some(*id)) {
                log_mirror_error(&err, "EventCache::load_used_descriptions");
            }
        }
        self.entries.len()
    }

    /// Drop every cached description the primary reports with zero live
    /// instances, unpinning its sample data.
    pub fn release_unused_descriptions(
        &mut self,
        system: &mut dyn StudioSystem,
        primary_counts: &[(String, usize)],
    ) -> usize {
        let mut released = 0;
        for (path, count) in primary_counts {
            if *count > 0 {
                continue;
            }
            if let Some(handle) = self.entries.remove(path) {
                if let Err(err) = system.unload_sample_data(handle) {
                    log::debug!("[EventCache] unload_sample_data({}) failed: {}", path, err);
                }
                released += 1;
            }
        }
        if released > 0 {
            log::debug!("[EventCache] Released {} unused descriptions", released);
        }
        released
    }

    /// Unpin every description and clear.
    pub fn unload_all(&mut self, system: &mut dyn StudioSystem) -> EngineResult<()> {
        let mut first_err = None;
        for (_, handle) in std::mem::take(&mut self.entries) {
            if let Err(err) = system.unload_sample_data(handle) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::studio::{BankLibrary, MemoryStudioSystem};
    use std::path::Path;
    use std::sync::Arc;

    fn loaded_system() -> MemoryStudioSystem {
        let mut sys = MemoryStudioSystem::new(Arc::new(BankLibrary::demo()));
        sys.load_bank_file(Path::new("Content/FMOD/Desktop/music.bank"))
            .unwrap();
        sys
    }

    #[test]
    fn test_resolves_path_and_pins_sample_data() {
        let mut sys = loaded_system();
        let mut cache = EventDescriptionCache::new();

        let handle = cache
            .load_event_description(&mut sys, "event:/music/lvl1", None)
            .unwrap()
            .unwrap();
        assert!(sys.sample_data_loaded(handle));
        assert_eq!(cache.get("event:/music/lvl1"), Some(handle));
    }

    #[test]
    fn test_cached_path_is_noop() {
        let mut sys = loaded_system();
        let mut cache = EventDescriptionCache::new();
        let first = cache
            .load_event_description(&mut sys, "event:/music/lvl1", None)
            .unwrap();
        let second = cache
            .load_event_description(&mut sys, "event:/music/lvl1", None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_guid_reference_resolves_by_id() {
        let mut sys = loaded_system();
        let desc = sys.get_event("event:/music/lvl2").unwrap();
        let id = sys.description_id(desc).unwrap();
        let path = format!("guid://{}", id);

        let mut cache = EventDescriptionCache::new();
        let handle = cache.load_event_description(&mut sys, &path, None).unwrap();
        assert_eq!(handle, Some(desc));
        assert!(cache.get(&path).is_some());
    }

    #[test]
    fn test_known_id_wins_over_path() {
        let mut sys = loaded_system();
        let menu = sys.get_event("event:/music/menu").unwrap();
        let id = sys.description_id(menu).unwrap();

        let mut cache = EventDescriptionCache::new();
        let handle = cache
            .load_event_description(&mut sys, "event:/renamed/menu", Some(id))
            .unwrap();
        assert_eq!(handle, Some(menu));
    }

    #[test]
    fn test_missing_and_empty_paths() {
        let mut sys = loaded_system();
        let mut cache = EventDescriptionCache::new();
        assert_eq!(cache.load_event_description(&mut sys, "", None).unwrap(), None);
        assert_eq!(
            cache
                .load_event_description(&mut sys, "event:/none", None)
                .unwrap(),
            None
        );
        assert_eq!(
            cache
                .load_event_description(&mut sys, "event:/missing", None)
                .unwrap(),
            None
        );
        assert!(cache.is_empty());
        assert!(is_silent_path("null"));
        assert!(!is_silent_path("event:/missing"));
    }

    #[test]
    fn test_other_errors_are_fatal() {
        let mut sys = loaded_system();
        sys.release().unwrap();
        let mut cache = EventDescriptionCache::new();
        let err = cache
            .load_event_description(&mut sys, "event:/music/lvl1", None)
            .unwrap_err();
        match err {
            MirrorError::DescriptionUnresolved { source, .. } => {
                assert_eq!(source, EngineError::NotInitialized)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_load_used_then_release_unused() {
        let mut sys = loaded_system();
        let mut cache = EventDescriptionCache::new();
        let used: Vec<(String, EventId)> = ["event:/music/lvl1", "event:/music/lvl2"]
            .iter()
            .map(|path| {
                let desc = sys.get_event(path).unwrap();
                (path.to_string(), sys.description_id(desc).unwrap())
            })
            .collect();

        assert_eq!(cache.load_used_descriptions(&mut sys, &used), 2);

        let lvl1 = cache.get("event:/music/lvl1").unwrap();
        let released = cache.release_unused_descriptions(
            &mut sys,
            &[
                ("event:/music/lvl1".to_string(), 0),
                ("event:/music/lvl2".to_string(), 1),
            ],
        );
        assert_eq!(released, 1);
        assert_eq!(cache.paths(), vec!["event:/music/lvl2".to_string()]);
        assert!(!sys.sample_data_loaded(lvl1));
    }
}
