use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::studio::{BankHandle, DescriptionHandle, EventId, StudioSystem};

use super::bank_cache::BankRecord;

/// Host-side audio bookkeeping of the primary engine: loaded banks, which
/// banks were ever loaded with their string table, and the host's
/// description cache.
#[derive(Debug, Default)]
pub struct HostCatalog {
    banks: BTreeMap<String, BankHandle>,
    banks_with_strings: BTreeSet<String>,
    descriptions: BTreeMap<String, DescriptionHandle>,
}

impl HostCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bank(&mut self, name: &str, handle: BankHandle, load_strings: bool) {
        if load_strings {
            self.banks_with_strings.insert(name.to_string());
        }
        self.banks.insert(name.to_string(), handle);
    }

    pub fn forget_bank(&mut self, name: &str) -> Option<BankHandle> {
        self.banks.remove(name)
    }

    pub fn bank(&self, name: &str) -> Option<BankHandle> {
        self.banks.get(name).copied()
    }

    pub fn bank_handles(&self) -> Vec<BankHandle> {
        self.banks.values().copied().collect()
    }

    /// The strings record outlives the bank, so a reload in a secondary
    /// engine asks for the same string table.
    pub fn needs_strings(&self, name: &str) -> bool {
        self.banks_with_strings.contains(name)
    }

    pub fn bank_records(&self) -> Vec<BankRecord> {
        self.banks
            .keys()
            .map(|name| BankRecord::new(name.clone(), self.needs_strings(name)))
            .collect()
    }

    pub fn cache_description(&mut self, path: &str, handle: DescriptionHandle) {
        self.descriptions.insert(path.to_string(), handle);
    }

    pub fn description(&self, path: &str) -> Option<DescriptionHandle> {
        self.descriptions.get(path).copied()
    }

    pub fn remove_description(&mut self, path: &str) -> Option<DescriptionHandle> {
        self.descriptions.remove(path)
    }

    pub fn descriptions(&self) -> impl Iterator<Item = (&str, DescriptionHandle)> + '_ {
        self.descriptions.iter().map(|(path, handle)| (path.as_str(), *handle))
    }

    /// Drop cached descriptions found in `list`.
    pub fn forget_descriptions(&mut self, list: &[DescriptionHandle]) {
        self.descriptions.retain(|_, handle| !list.contains(handle));
    }
}

/// Everything a secondary engine needs to catch up with the primary,
/// detached from the primary so it can cross to a worker thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimarySnapshot {
    pub banks: Vec<BankRecord>,
    pub descriptions: Vec<(String, EventId)>,
}

/// Read access to the primary engine and its host bookkeeping.
#[derive(Clone, Copy)]
pub struct PrimaryView<'a> {
    pub system: &'a dyn StudioSystem,
    pub catalog: &'a HostCatalog,
}

impl<'a> PrimaryView<'a> {
    pub fn new(system: &'a dyn StudioSystem, catalog: &'a HostCatalog) -> Self {
        Self { system, catalog }
    }

    pub fn snapshot(&self) -> PrimarySnapshot {
        let descriptions = self
            .catalog
            .descriptions()
            .filter_map(|(path, handle)| match self.system.description_id(handle) {
                Ok(id) => Some((path.to_string(), id)),
                Err(err) => {
                    log::debug!("[HostCatalog] Skipping stale description {}: {}", path, err);
                    None
                }
            })
            .collect();
        PrimarySnapshot {
            banks: self.catalog.bank_records(),
            descriptions,
        }
    }

    /// Live instance count per cached description path.
    pub fn instance_counts(&self) -> Vec<(String, usize)> {
        self.catalog
            .descriptions()
            .map(|(path, handle)| {
                let count = self.system.description_instance_count(handle).unwrap_or(0);
                (path.to_string(), count)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio::{BankLibrary, MemoryStudioSystem};
    use std::path::Path;
    use std::sync::Arc;

    #[test]
    fn test_strings_record_outlives_bank() {
        let mut catalog = HostCatalog::new();
        catalog.record_bank("master", BankHandle(1), true);
        catalog.record_bank("music", BankHandle(2), false);
        assert_eq!(
            catalog.bank_records(),
            vec![
                BankRecord::new("master", true),
                BankRecord::new("music", false)
            ]
        );

        catalog.forget_bank("master");
        assert!(catalog.needs_strings("master"));
        catalog.record_bank("master", BankHandle(3), false);
        assert_eq!(catalog.bank_records()[0], BankRecord::new("master", true));
    }

    #[test]
    fn test_snapshot_and_counts() {
        let mut sys = MemoryStudioSystem::new(Arc::new(BankLibrary::demo()));
        let bank = sys
            .load_bank_file(Path::new("Content/FMOD/Desktop/music.bank"))
            .unwrap();
        let lvl1 = sys.get_event("event:/music/lvl1").unwrap();
        let menu = sys.get_event("event:/music/menu").unwrap();
        sys.create_instance(lvl1).unwrap();

        let mut catalog = HostCatalog::new();
        catalog.record_bank("music", bank, false);
        catalog.cache_description("event:/music/lvl1", lvl1);
        catalog.cache_description("event:/music/menu", menu);

        let view = PrimaryView::new(&sys, &catalog);
        let snapshot = view.snapshot();
        assert_eq!(snapshot.banks, vec![BankRecord::new("music", false)]);
        assert_eq!(snapshot.descriptions.len(), 2);
        assert_eq!(
            view.instance_counts(),
            vec![
                ("event:/music/lvl1".to_string(), 1),
                ("event:/music/menu".to_string(), 0)
            ]
        );

        catalog.forget_descriptions(&sys.bank_event_list(bank).unwrap());
        assert!(catalog.description("event:/music/lvl1").is_none());
    }
}
