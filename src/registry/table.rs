/*!
 * Handle Table Adapter
 *
 * Narrow interface over the concurrent hash table that maps handle values
 * to records. The registry depends only on this surface; record lifetime is
 * the free-list reclaimer's concern, not the table's.
 */

use super::info::IdInfo;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;

/// Per-type handle → record map
pub struct HandleTable {
    map: DashMap<u64, Arc<IdInfo>, RandomState>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Insert a record; false when the key is already present
    pub fn add(&self, key: u64, info: Arc<IdInfo>) -> bool {
        match self.map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(info);
                true
            }
        }
    }

    pub fn find(&self, key: u64) -> Option<Arc<IdInfo>> {
        self.map.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn delete(&self, key: u64) -> Option<Arc<IdInfo>> {
        self.map.remove(&key).map(|(_, info)| info)
    }

    /// Smallest key and its record
    pub fn get_first(&self) -> Option<(u64, Arc<IdInfo>)> {
        self.scan_after(None)
    }

    /// Smallest key strictly greater than `prev` and its record
    pub fn get_next(&self, prev: u64) -> Option<(u64, Arc<IdInfo>)> {
        self.scan_after(Some(prev))
    }

    fn scan_after(&self, prev: Option<u64>) -> Option<(u64, Arc<IdInfo>)> {
        let mut best: Option<(u64, Arc<IdInfo>)> = None;
        for entry in self.map.iter() {
            let key = *entry.key();
            if let Some(p) = prev {
                if key <= p {
                    continue;
                }
            }
            match best {
                Some((k, _)) if k <= key => {}
                _ => best = Some((key, Arc::clone(entry.value()))),
            }
        }
        best
    }

    /// Unordered copy of the current entries
    ///
    /// Iteration and sweep paths work from this so no table shard stays
    /// locked across a user callback. Entries added concurrently may or may
    /// not appear, matching the iteration contract.
    pub fn snapshot(&self) -> Vec<(u64, Arc<IdInfo>)> {
        self.map
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
