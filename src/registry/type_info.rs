/*!
 * Type Info Records
 * Per-type registry: class descriptor, counters, handle table, MRU cache
 */

use super::class::TypeClass;
use super::info::IdInfo;
use super::table::HandleTable;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Registry state for one type slot
pub struct TypeInfo {
    /// Immutable class descriptor
    class: Arc<TypeClass>,
    /// Nesting depth of register_type calls; 1 → 0 destroys the type
    init_count: AtomicU32,
    /// Live (unmarked) records in the table
    id_count: AtomicU64,
    /// Monotonic index allocator
    next_id: AtomicU64,
    /// Most recently accessed record; lookup consults this before the table
    last_info: ArcSwapOption<IdInfo>,
    /// Set when destroy has drained the table; further use is BadGroup
    cleared: AtomicBool,
    /// Handle → record map
    table: HandleTable,
}

impl TypeInfo {
    pub fn new(class: Arc<TypeClass>) -> Self {
        let reserved = class.reserved;
        Self {
            class,
            init_count: AtomicU32::new(1),
            id_count: AtomicU64::new(0),
            next_id: AtomicU64::new(reserved),
            last_info: ArcSwapOption::const_empty(),
            cleared: AtomicBool::new(false),
            table: HandleTable::new(),
        }
    }

    /// Reinitialize a record recycled from the type free list
    pub fn reinit(&mut self, class: Arc<TypeClass>) {
        let reserved = class.reserved;
        self.class = class;
        self.init_count.store(1, Ordering::SeqCst);
        self.id_count.store(0, Ordering::SeqCst);
        self.next_id.store(reserved, Ordering::SeqCst);
        self.last_info.store(None);
        self.cleared.store(false, Ordering::SeqCst);
        self.table.clear();
    }

    #[inline]
    pub fn class(&self) -> &Arc<TypeClass> {
        &self.class
    }

    #[inline]
    pub fn table(&self) -> &HandleTable {
        &self.table
    }

    /// Claim the next per-type index
    #[inline]
    pub fn next_index(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Undo an index claim that failed validation
    ///
    /// Only called on the overflow path, where monotonicity is moot.
    #[inline]
    pub fn unclaim_index(&self) {
        self.next_id.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn id_count(&self) -> u64 {
        self.id_count.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn inc_id_count(&self) {
        self.id_count.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn dec_id_count(&self) {
        let prev = self.id_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0);
    }

    #[inline]
    pub fn init_count(&self) -> u32 {
        self.init_count.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn inc_init_count(&self) -> u32 {
        self.init_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Checked decrement; `None` when the count is already zero (the type
    /// is being torn down by another thread)
    pub fn try_dec_init_count(&self) -> Option<u32> {
        self.init_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                depth.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    #[inline]
    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn mark_cleared(&self) {
        self.cleared.store(true, Ordering::SeqCst);
    }

    /// Consult the MRU cache
    pub fn cached(&self, handle: i64) -> Option<Arc<IdInfo>> {
        let cached = self.last_info.load();
        match &*cached {
            Some(info) if info.handle() == handle => Some(Arc::clone(info)),
            _ => None,
        }
    }

    /// Remember the most recently accessed record
    #[inline]
    pub fn cache_store(&self, info: &Arc<IdInfo>) {
        self.last_info.store(Some(Arc::clone(info)));
    }

    /// Drop the cache entry if it names this record
    ///
    /// Called before retiring a record so the cache cannot pin it on the
    /// free list. A racing cache_store is benign: lookup re-checks marked.
    pub fn cache_invalidate(&self, info: &Arc<IdInfo>) {
        let cached = self.last_info.load();
        if let Some(current) = &*cached {
            if Arc::ptr_eq(current, info) {
                self.last_info.store(None);
            }
        }
    }
}

impl std::fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("tag", &self.class.tag)
            .field("init_count", &self.init_count())
            .field("id_count", &self.id_count())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Object;

    fn type_info(tag: usize, reserved: u64) -> TypeInfo {
        let mut class = TypeClass::new(tag);
        class.reserved = reserved;
        TypeInfo::new(Arc::new(class))
    }

    fn record(handle: i64) -> Arc<IdInfo> {
        let object: Object = Arc::new(0usize);
        Arc::new(IdInfo::new(handle, object, false, None, None))
    }

    #[test]
    fn test_index_allocation_is_monotonic() {
        let info = type_info(2, 100);
        assert_eq!(info.next_index(), 100);
        assert_eq!(info.next_index(), 101);
        assert_eq!(info.next_index(), 102);
    }

    #[test]
    fn test_cache_hit_and_invalidate() {
        let type_info = type_info(2, 0);
        let rec = record(0x42);
        type_info.cache_store(&rec);

        assert!(type_info.cached(0x42).is_some());
        assert!(type_info.cached(0x43).is_none());

        type_info.cache_invalidate(&rec);
        assert!(type_info.cached(0x42).is_none());
    }

    #[test]
    fn test_invalidate_ignores_other_records() {
        let type_info = type_info(2, 0);
        let cached = record(0x42);
        let other = record(0x43);
        type_info.cache_store(&cached);
        type_info.cache_invalidate(&other);
        assert!(type_info.cached(0x42).is_some());
    }

    #[test]
    fn test_reinit_resets_state() {
        let mut info = type_info(2, 0);
        info.next_index();
        info.inc_id_count();
        info.mark_cleared();

        let mut class = TypeClass::new(5);
        class.reserved = 7;
        info.reinit(Arc::new(class));

        assert_eq!(info.class().tag, 5);
        assert_eq!(info.next_index(), 7);
        assert_eq!(info.id_count(), 0);
        assert_eq!(info.init_count(), 1);
        assert!(!info.is_cleared());
    }
}
