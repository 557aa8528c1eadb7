use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{log_mirror_error, EngineError, MirrorError};
use crate::studio::{BankHandle, StudioSystem};

/// Bank as recorded when the primary engine loaded it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BankRecord {
    pub name: String,
    /// The host asked for the string table as well.
    pub load_strings: bool,
}

impl BankRecord {
    pub fn new(name: impl Into<String>, load_strings: bool) -> Self {
        Self {
            name: name.into(),
            load_strings,
        }
    }
}

/// Maps bank names to bank files.
pub trait BankLocator: Send + Sync {
    fn bank_file(&self, name: &str) -> PathBuf;
    fn strings_bank_file(&self, name: &str) -> PathBuf;
}

/// Game content layout: `<root>/FMOD/Desktop/<name>.bank`, with mod banks
/// overriding individual names.
#[derive(Debug, Clone, Default)]
pub struct ContentDirLocator {
    root: PathBuf,
    mod_banks: HashMap<String, PathBuf>,
}

impl ContentDirLocator {
    pub fn new(root: impl Into<PathBuf>, mod_banks: HashMap<String, PathBuf>) -> Self {
        Self {
            root: root.into(),
            mod_banks,
        }
    }

    fn desktop_dir(&self) -> PathBuf {
        self.root.join("FMOD").join("Desktop")
    }
}

impl BankLocator for ContentDirLocator {
    fn bank_file(&self, name: &str) -> PathBuf {
        match self.mod_banks.get(name) {
            Some(path) => path.clone(),
            None => self.desktop_dir().join(format!("{}.bank", name)),
        }
    }

    fn strings_bank_file(&self, name: &str) -> PathBuf {
        match self.mod_banks.get(name) {
            // Mod banks ship their string table next to the bank.
            Some(path) => path.with_file_name(format!("{}.strings.bank", file_stem(path, name))),
            None => self.desktop_dir().join(format!("{}.strings.bank", name)),
        }
    }
}

fn file_stem<'a>(path: &'a Path, fallback: &'a str) -> &'a str {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(fallback)
}

/// Banks loaded into one secondary engine.
///
/// A handle is `None` when the engine reported the file as already
/// resident, which happens when two names point at the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankEntry {
    pub bank: Option<BankHandle>,
    pub strings: Option<BankHandle>,
    pub load_strings: bool,
}

pub struct BankCache {
    entries: BTreeMap<String, BankEntry>,
}

impl BankCache {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Option<&BankEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load every bank in `banks` the cache doesn't hold yet.
    ///
    /// A failing bank is logged and left out so a later call retries it;
    /// the remaining banks still load. Returns the names loaded by this call.
    pub fn load_unloaded_banks(
        &mut self,
        system: &mut dyn StudioSystem,
        locator: &dyn BankLocator,
        banks: &[BankRecord],
    ) -> Vec<String> {
        let mut loaded = Vec::new();
        for record in banks {
            if self.contains(&record.name) {
                continue;
            }
            match self.load_bank(system, locator, record) {
                Ok(_) => loaded.push(record.name.clone()),
                Err(err) => log_mirror_error(&err, "BankCache::load_unloaded_banks"),
            }
        }
        loaded
    }

    /// Load one bank, plus its string table when the record asks for it.
    pub fn load_bank(
        &mut self,
        system: &mut dyn StudioSystem,
        locator: &dyn BankLocator,
        record: &BankRecord,
    ) -> Result<BankEntry, MirrorError> {
        if let Some(entry) = self.entries.get(&record.name) {
            return Ok(*entry);
        }

        log::trace!("[BankCache] Trying to load bank {}", record.name);
        let bank = load_file(system, &locator.bank_file(&record.name), &record.name)?;

        let strings = if record.load_strings {
            let strings_name = format!("{}.strings", record.name);
            match load_file(system, &locator.strings_bank_file(&record.name), &strings_name) {
                Ok(handle) => handle,
                Err(err) => {
                    if let Some(handle) = bank {
                        if let Err(unload_err) = system.unload_bank(handle) {
                            log::warn!(
                                "[BankCache] Failed to roll back bank {}: {}",
                                record.name,
                                unload_err
                            );
                        }
                    }
                    return Err(err);
                }
            }
        } else {
            None
        };

        let entry = BankEntry {
            bank,
            strings,
            load_strings: record.load_strings,
        };
        self.entries.insert(record.name.clone(), entry);
        log::debug!(
            "[BankCache] Loaded bank {} (strings: {})",
            record.name,
            record.load_strings
        );
        Ok(entry)
    }

    /// Unload every cached bank and clear the cache.
    pub fn unload_banks(&mut self, system: &mut dyn StudioSystem) {
        for (name, entry) in std::mem::take(&mut self.entries) {
            for handle in [entry.strings, entry.bank].into_iter().flatten() {
                if let Err(err) = system.unload_bank(handle) {
                    log::warn!("[BankCache] Failed to unload bank {}: {}", name, err);
                }
            }
        }
    }
}

impl Default for BankCache {
    fn default() -> Self {
        Self::new()
    }
}

fn load_file(
    system: &mut dyn StudioSystem,
    path: &Path,
    name: &str,
) -> Result<Option<BankHandle>, MirrorError> {
    match system.load_bank_file(path) {
        Ok(handle) => Ok(Some(handle)),
        Err(EngineError::AlreadyLoaded { .. }) => {
            log::debug!("[BankCache] Bank {} already loaded", name);
            Ok(None)
        }
        Err(source) => Err(MirrorError::BankLoadFailed {
            bank: name.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio::{BankLibrary, MemoryStudioSystem};
    use std::sync::Arc;

    fn system() -> MemoryStudioSystem {
        MemoryStudioSystem::new(Arc::new(BankLibrary::demo()))
    }

    fn locator() -> ContentDirLocator {
        ContentDirLocator::new("Content", HashMap::new())
    }

    #[test]
    fn test_locator_paths() {
        let mut mods = HashMap::new();
        mods.insert(
            "modmusic".to_string(),
            PathBuf::from("/mods/cool/Audio/modmusic.bank"),
        );
        let locator = ContentDirLocator::new("/game/Content", mods);

        assert_eq!(
            locator.bank_file("music"),
            PathBuf::from("/game/Content/FMOD/Desktop/music.bank")
        );
        assert_eq!(
            locator.strings_bank_file("master"),
            PathBuf::from("/game/Content/FMOD/Desktop/master.strings.bank")
        );
        assert_eq!(
            locator.bank_file("modmusic"),
            PathBuf::from("/mods/cool/Audio/modmusic.bank")
        );
        assert_eq!(
            locator.strings_bank_file("modmusic"),
            PathBuf::from("/mods/cool/Audio/modmusic.strings.bank")
        );
    }

    #[test]
    fn test_loads_only_missing_banks() {
        let mut sys = system();
        let mut cache = BankCache::new();
        let banks = vec![BankRecord::new("music", false)];

        let loaded = cache.load_unloaded_banks(&mut sys, &locator(), &banks);
        assert_eq!(loaded, vec!["music".to_string()]);
        let entry = cache.entry("music").copied().unwrap();
        assert!(entry.bank.is_some());
        assert!(entry.strings.is_none());

        let loaded = cache.load_unloaded_banks(&mut sys, &locator(), &banks);
        assert!(loaded.is_empty());
        assert_eq!(sys.loaded_bank_count(), 1);
    }

    #[test]
    fn test_strings_loaded_when_requested() {
        let mut sys = system();
        let mut cache = BankCache::new();
        cache.load_unloaded_banks(&mut sys, &locator(), &[BankRecord::new("master", true)]);

        let entry = cache.entry("master").copied().unwrap();
        assert!(entry.strings.is_some());
        assert_eq!(sys.loaded_bank_count(), 2);
    }

    #[test]
    fn test_already_loaded_is_success_without_handle() {
        let mut sys = system();
        sys.load_bank_file(&locator().bank_file("music")).unwrap();

        let mut cache = BankCache::new();
        let entry = cache
            .load_bank(&mut sys, &locator(), &BankRecord::new("music", false))
            .unwrap();
        assert!(entry.bank.is_none());
        assert!(cache.contains("music"));
    }

    #[test]
    fn test_failure_is_fatal_to_that_bank_only() {
        let mut sys = system();
        let mut cache = BankCache::new();
        let banks = vec![
            BankRecord::new("missing", false),
            BankRecord::new("music", false),
        ];

        let loaded = cache.load_unloaded_banks(&mut sys, &locator(), &banks);
        assert_eq!(loaded, vec!["music".to_string()]);
        assert!(!cache.contains("missing"));
    }

    #[test]
    fn test_missing_strings_rolls_back_bank() {
        let mut sys = system();
        let mut cache = BankCache::new();
        let err = cache
            .load_bank(&mut sys, &locator(), &BankRecord::new("music", true))
            .unwrap_err();
        assert!(matches!(err, MirrorError::BankLoadFailed { .. }));
        assert_eq!(sys.loaded_bank_count(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unload_banks_releases_both_handles() {
        let mut sys = system();
        let mut cache = BankCache::new();
        cache.load_unloaded_banks(
            &mut sys,
            &locator(),
            &[BankRecord::new("master", true), BankRecord::new("music", false)],
        );
        assert_eq!(sys.loaded_bank_count(), 3);

        cache.unload_banks(&mut sys);
        assert!(cache.is_empty());
        assert_eq!(sys.loaded_bank_count(), 0);
    }
}
