use crate::model::{CatalogEntry, FileIdentity};
use std::collections::{HashMap, HashSet};

/// Snapshot of the library from one scan. Never mutated; a rescan builds a
/// new catalog.
#[derive(Debug, Clone, Default)]
pub struct MediaCatalog {
    entries: Vec<CatalogEntry>,
    lookup: HashMap<FileIdentity, usize>,
}

impl MediaCatalog {
    /// Drops repeated identities (first occurrence wins) and sorts by display
    /// name without regard to case. Ties fall back to the path.
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut entries: Vec<CatalogEntry> = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.identity.clone()))
            .collect();

        entries.sort_by_cached_key(|entry| {
            (
                entry.display_name.to_lowercase(),
                entry.identity.path().to_path_buf(),
            )
        });

        let lookup = build_lookup(&entries);
        Self { entries, lookup }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn item_at(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }

    pub fn index_of(&self, identity: &FileIdentity) -> Option<usize> {
        self.lookup.get(identity).copied()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }
}

fn build_lookup(entries: &[CatalogEntry]) -> HashMap<FileIdentity, usize> {
    let mut map = HashMap::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        map.insert(entry.identity.clone(), idx);
    }
    map
}
