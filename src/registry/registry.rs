/*!
 * Handle Registry
 *
 * Process-wide registry state and the ID lifecycle operations: register,
 * lookup, reference counting, substitution, removal. Every mutation of a
 * record goes through a compare-exchange on its kernel pointer; the
 * committing CAS is the linearization point. Callbacks that cannot be
 * rolled back run under the record's do-not-disturb token.
 */

use super::activity::{ActivityTracker, EntryKind};
use super::class::TypeClass;
use super::freelist::FreeList;
use super::info::IdInfo;
use super::kernel::{Disturb, IdKernel};
use super::stats::{RegistryStats, StatsSnapshot};
use super::type_info::TypeInfo;
use crate::core::errors::{RegistryError, RegistryResult};
use crate::core::handle::{encode, type_of};
use crate::core::limits::{FREELIST_MAX_DESIRED, ID_MASK, MAX_TYPES, NUM_LIB_TYPES};
use crate::core::types::{
    AsyncRequest, DiscardFunc, Handle, Object, RealizeFunc, TypeTag,
};
use crate::sync::{ApiLock, Backoff};
use arc_swap::ArcSwapOption;
use crossbeam_epoch as epoch;
use log::{debug, error, info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of one pass through a kernel CAS loop
enum Attempt<T> {
    /// Committed; carry the result out
    Done(T),
    /// Lost the CAS race; retry immediately
    Contended,
    /// Another thread holds the do-not-disturb token; back off first
    Blocked,
}

/// Committed outcome of one `dec_ref` CAS
enum DecOutcome {
    /// Plain decrement, or a final release with nothing to run
    Count(u32),
    /// Token secured for the free_func path
    TokenHeld { needs_lock: bool },
}

/// Multi-threaded identifier registry
///
/// Issues opaque integer handles for caller objects, with per-handle
/// reference counts and lock-free concurrent lookup, registration, and
/// release. Instantiable so tests can run against fresh registries; a
/// process normally holds one in a `static`.
pub struct Registry {
    /// One slot per encodable type tag; index 0 reserved
    pub(super) types: Vec<ArcSwapOption<TypeInfo>>,
    /// Which type slots are claimed
    pub(super) allocated: Vec<AtomicBool>,
    /// Application type-tag allocator
    pub(super) next_type: AtomicUsize,
    /// Nesting depth of active clear sweeps per type; while positive,
    /// physical deletion from the table is deferred to the sweeper
    pub(super) marking: Vec<AtomicU32>,
    /// Retired ID records awaiting quiescence
    pub(super) id_free: FreeList<IdInfo>,
    /// Retired type records awaiting quiescence
    pub(super) type_free: FreeList<TypeInfo>,
    /// Active-thread bookkeeping
    pub(super) activity: ActivityTracker,
    /// The embedding library's global API lock
    pub(super) api_lock: Arc<ApiLock>,
    pub(super) stats: RegistryStats,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_api_lock(Arc::new(ApiLock::new()))
    }

    /// Build a registry sharing the embedding library's API lock
    pub fn with_api_lock(api_lock: Arc<ApiLock>) -> Self {
        let types = (0..MAX_TYPES).map(|_| ArcSwapOption::const_empty()).collect();
        let allocated = (0..MAX_TYPES)
            .map(|slot| AtomicBool::new(slot >= 1 && slot < NUM_LIB_TYPES))
            .collect();
        let marking = (0..MAX_TYPES).map(|_| AtomicU32::new(0)).collect();
        info!(
            "handle registry initialized ({} type slots, {} reserved for library types)",
            MAX_TYPES, NUM_LIB_TYPES
        );
        Self {
            types,
            allocated,
            next_type: AtomicUsize::new(NUM_LIB_TYPES),
            marking,
            id_free: FreeList::new(FREELIST_MAX_DESIRED),
            type_free: FreeList::new(FREELIST_MAX_DESIRED),
            activity: ActivityTracker::new(),
            api_lock,
            stats: RegistryStats::new(),
        }
    }

    #[inline]
    pub fn api_lock(&self) -> &Arc<ApiLock> {
        &self.api_lock
    }

    /// Threads currently executing inside the registry
    #[inline]
    pub fn active_threads(&self) -> u64 {
        self.activity.active()
    }

    // ========================================================================
    // Enter/exit bookkeeping
    // ========================================================================

    pub(super) fn enter(&self, kind: EntryKind) -> ActivityGuard<'_> {
        self.activity.enter(kind);
        ActivityGuard { registry: self }
    }

    // ========================================================================
    // Type registry
    // ========================================================================

    /// Install (or reference) a type
    ///
    /// Library-range tags claim their slot on first registration;
    /// application tags must have been reserved through
    /// [`Registry::reserve_type_tag`]. Re-registering a live type bumps its
    /// init count.
    pub fn register_type(&self, class: TypeClass) -> RegistryResult<()> {
        let _activity = self.enter(EntryKind::Public);
        let tag = class.tag;
        self.validate_tag(tag)?;

        if class.is_application() {
            if tag < NUM_LIB_TYPES {
                return Err(RegistryError::BadRange(format!(
                    "application class may not claim library tag {}",
                    tag
                )));
            }
            if !self.allocated[tag].load(Ordering::SeqCst) {
                return Err(RegistryError::BadRange(format!(
                    "type tag {} was never reserved",
                    tag
                )));
            }
        } else if tag >= NUM_LIB_TYPES {
            return Err(RegistryError::BadRange(format!(
                "library class may not claim application tag {}",
                tag
            )));
        } else {
            self.allocated[tag].store(true, Ordering::SeqCst);
        }

        let fresh = Arc::new(self.allocate_type_info(class));
        loop {
            let current = self.types[tag].load();
            if let Some(existing) = &*current {
                // Lost to (or arrived after) another registration; the
                // fresh record was never published, drop it outright
                let depth = existing.inc_init_count();
                debug!("type {} re-registered (init_count {})", tag, depth);
                return Ok(());
            }
            let previous = self.types[tag].compare_and_swap(&current, Some(Arc::clone(&fresh)));
            if previous.is_none() {
                debug!("type {} registered", tag);
                return Ok(());
            }
        }
    }

    /// Reserve a fresh application type tag
    pub fn reserve_type_tag(&self) -> RegistryResult<TypeTag> {
        let _activity = self.enter(EntryKind::Public);
        loop {
            let tag = self.next_type.fetch_add(1, Ordering::SeqCst);
            if tag >= MAX_TYPES {
                // Keep the counter from marching into overflow territory
                self.next_type.store(MAX_TYPES, Ordering::SeqCst);
                return Err(RegistryError::AllocFailed(
                    "application type table exhausted".into(),
                ));
            }
            if !self.allocated[tag].swap(true, Ordering::SeqCst) {
                return Ok(tag);
            }
        }
    }

    /// True when the tag names a live type
    pub fn type_exists(&self, tag: TypeTag) -> RegistryResult<bool> {
        let _activity = self.enter(EntryKind::Public);
        self.validate_tag(tag)?;
        Ok(self.types[tag].load().is_some())
    }

    /// Number of live (unmarked) IDs of a type; 0 when uninitialized
    pub fn nmembers(&self, tag: TypeTag) -> RegistryResult<u64> {
        let _activity = self.enter(EntryKind::Public);
        self.validate_tag(tag)?;
        match &*self.types[tag].load() {
            Some(type_info) if !type_info.is_cleared() => Ok(type_info.id_count()),
            _ => Ok(0),
        }
    }

    /// Bump a type's init count
    pub fn inc_type_ref(&self, tag: TypeTag) -> RegistryResult<u32> {
        let _activity = self.enter(EntryKind::Public);
        let type_info = self.type_info(tag)?;
        Ok(type_info.inc_init_count())
    }

    /// Drop a type's init count; 1 → 0 destroys the type
    pub fn dec_type_ref(&self, tag: TypeTag) -> RegistryResult<u32> {
        let _activity = self.enter(EntryKind::Public);
        let type_info = self.type_info(tag)?;
        let remaining = type_info
            .try_dec_init_count()
            .ok_or(RegistryError::BadGroup(tag))?;
        if remaining == 0 {
            let _nested = self.enter(EntryKind::Internal);
            self.destroy_type_impl(tag, type_info)?;
        }
        Ok(remaining)
    }

    // ========================================================================
    // ID lifecycle
    // ========================================================================

    /// Register an object, yielding a fresh handle holding one reference
    pub fn register(&self, tag: TypeTag, object: Object, app_ref: bool) -> RegistryResult<Handle> {
        let _activity = self.enter(EntryKind::Public);
        let handle = self.register_common(tag, object, app_ref, None, None)?;
        RegistryStats::bump(&self.stats.registrations);
        Ok(handle)
    }

    /// Register a future handle standing in for a not-yet-realized object
    ///
    /// The first successful lookup runs `realize` to obtain the actual
    /// object and `discard` to release the placeholder.
    pub fn register_future(
        &self,
        tag: TypeTag,
        placeholder: Object,
        app_ref: bool,
        realize: RealizeFunc,
        discard: DiscardFunc,
    ) -> RegistryResult<Handle> {
        let _activity = self.enter(EntryKind::Public);
        let handle =
            self.register_common(tag, placeholder, app_ref, Some(realize), Some(discard))?;
        RegistryStats::bump(&self.stats.future_registrations);
        Ok(handle)
    }

    /// Register an object under a caller-chosen handle
    ///
    /// Used by re-open paths that must preserve a handle value. A live
    /// record under the handle is `InUse`; a marked leftover is displaced.
    pub fn register_with_handle(
        &self,
        handle: Handle,
        object: Object,
        app_ref: bool,
    ) -> RegistryResult<()> {
        let _activity = self.enter(EntryKind::Public);
        let (_, type_info) = self.type_info_for_handle(handle)?;

        if let Some(existing) = type_info.table().find(handle as u64) {
            let guard = epoch::pin();
            let (_, kernel) = existing.kernel(&guard);
            if !kernel.marked {
                return Err(RegistryError::InUse(handle));
            }
            // Stale record left for a sweeper that has not run yet
            type_info.cache_invalidate(&existing);
            if let Some(stale) = type_info.table().delete(handle as u64) {
                self.id_free.retire(stale);
            }
        }

        let record = self.allocate_id_info(handle, object, app_ref, None, None);
        type_info.inc_id_count();
        if !type_info.table().add(handle as u64, Arc::clone(&record)) {
            type_info.dec_id_count();
            return Err(RegistryError::InUse(handle));
        }
        type_info.cache_store(&record);
        RegistryStats::bump(&self.stats.reregistrations);
        Ok(())
    }

    fn register_common(
        &self,
        tag: TypeTag,
        object: Object,
        app_ref: bool,
        realize: Option<RealizeFunc>,
        discard: Option<DiscardFunc>,
    ) -> RegistryResult<Handle> {
        let type_info = self.type_info(tag)?;

        let index = type_info.next_index();
        if index > ID_MASK as u64 {
            type_info.unclaim_index();
            error!("type {} exhausted its index space", tag);
            return Err(RegistryError::BadRange(format!(
                "type {} index space exhausted",
                tag
            )));
        }
        let handle = encode(tag, index);

        let record = self.allocate_id_info(handle, object, app_ref, realize, discard);
        type_info.inc_id_count();
        if !type_info.table().add(handle as u64, Arc::clone(&record)) {
            // The index allocator is monotonic; a collision means the
            // registry's own bookkeeping is broken
            type_info.dec_id_count();
            return Err(RegistryError::Internal(format!(
                "fresh handle {:#x} already present",
                handle
            )));
        }
        type_info.cache_store(&record);
        Ok(handle)
    }

    fn allocate_id_info(
        &self,
        handle: Handle,
        object: Object,
        app_ref: bool,
        realize: Option<RealizeFunc>,
        discard: Option<DiscardFunc>,
    ) -> Arc<IdInfo> {
        match self.id_free.try_reuse() {
            Some(mut recycled) => {
                recycled.reinit(handle, object, app_ref, realize, discard);
                Arc::new(recycled)
            }
            None => Arc::new(IdInfo::new(handle, object, app_ref, realize, discard)),
        }
    }

    fn allocate_type_info(&self, class: TypeClass) -> TypeInfo {
        let class = Arc::new(class);
        match self.type_free.try_reuse() {
            Some(mut recycled) => {
                recycled.reinit(class);
                recycled
            }
            None => TypeInfo::new(class),
        }
    }

    /// Look up a handle and return its object
    ///
    /// Resolves future handles on first success. `NotFound` covers both
    /// absent and marked records.
    pub fn find(&self, handle: Handle) -> RegistryResult<Object> {
        let _activity = self.enter(EntryKind::Public);
        self.find_impl(handle)
    }

    pub(super) fn find_impl(&self, handle: Handle) -> RegistryResult<Object> {
        RegistryStats::bump(&self.stats.lookups);
        let (tag, type_info, record, from_cache) = self.resolve(handle)?;
        if from_cache {
            RegistryStats::bump(&self.stats.lookup_cache_hits);
        }

        let mut backoff = Backoff::new();
        let mut guard = epoch::pin();
        loop {
            let attempt = {
                let (_, kernel) = record.kernel(&guard);
                if kernel.marked {
                    RegistryStats::bump(&self.stats.lookup_misses);
                    return Err(RegistryError::NotFound(handle));
                }
                if kernel.token_held() && !self.may_bypass(kernel) {
                    Attempt::Blocked
                } else if kernel.is_future {
                    if kernel.token_held() {
                        // Bypass during an in-flight realization: hand back
                        // the placeholder, the holder owns the transition
                        RegistryStats::bump(&self.stats.disturb_bypasses);
                        let object = self.expect_object(kernel, handle)?;
                        return Ok(object);
                    }
                    Attempt::Done(None)
                } else {
                    if kernel.token_held() {
                        RegistryStats::bump(&self.stats.disturb_bypasses);
                    }
                    let object = self.expect_object(kernel, handle)?;
                    type_info.cache_store(&record);
                    Attempt::Done(Some(object))
                }
            };
            match attempt {
                Attempt::Done(Some(object)) => return Ok(object),
                // Future handle with an open token: run the realization
                // protocol, which manages the token itself
                Attempt::Done(None) => return self.realize_future(handle, tag, &type_info, &record),
                Attempt::Blocked => {
                    RegistryStats::bump(&self.stats.disturb_waits);
                    backoff.snooze();
                    guard.repin();
                }
                Attempt::Contended => unreachable!("lookup commits nothing"),
            }
        }
    }

    /// Swap a record's object, returning the previous one
    pub fn substitute(&self, handle: Handle, new_object: Object) -> RegistryResult<Object> {
        let _activity = self.enter(EntryKind::Public);
        RegistryStats::bump(&self.stats.substitutes);
        let (_, _, record, _) = self.resolve(handle)?;

        let mut backoff = Backoff::new();
        let mut guard = epoch::pin();
        loop {
            let attempt = {
                let (shared, kernel) = record.kernel(&guard);
                if kernel.marked {
                    return Err(RegistryError::NotFound(handle));
                }
                if kernel.token_held() && !self.may_bypass(kernel) {
                    Attempt::Blocked
                } else {
                    if kernel.token_held() {
                        RegistryStats::bump(&self.stats.disturb_bypasses);
                    }
                    let previous = self.expect_object(kernel, handle)?;
                    let mut next = kernel.clone();
                    next.object = Some(Arc::clone(&new_object));
                    if record.try_commit(shared, next, &guard) {
                        Attempt::Done(previous)
                    } else {
                        Attempt::Contended
                    }
                }
            };
            match attempt {
                Attempt::Done(previous) => return Ok(previous),
                Attempt::Contended => {
                    RegistryStats::bump(&self.stats.kernel_cas_retries);
                    backoff.reset();
                }
                Attempt::Blocked => {
                    RegistryStats::bump(&self.stats.disturb_waits);
                    backoff.snooze();
                    guard.repin();
                }
            }
        }
    }

    /// Bump a handle's reference count, returning the new total count
    pub fn inc_ref(&self, handle: Handle, app_ref: bool) -> RegistryResult<u32> {
        let _activity = self.enter(EntryKind::Public);
        RegistryStats::bump(&self.stats.inc_refs);
        let (_, type_info, record, _) = self.resolve(handle)?;

        let mut backoff = Backoff::new();
        let mut guard = epoch::pin();
        loop {
            let attempt = {
                let (shared, kernel) = record.kernel(&guard);
                if kernel.marked {
                    return Err(RegistryError::NotFound(handle));
                }
                if kernel.token_held() && !self.may_bypass(kernel) {
                    Attempt::Blocked
                } else {
                    if kernel.token_held() {
                        RegistryStats::bump(&self.stats.disturb_bypasses);
                    }
                    let mut next = kernel.clone();
                    next.count += 1;
                    if app_ref {
                        next.app_count += 1;
                    }
                    let new_count = next.count;
                    if record.try_commit(shared, next, &guard) {
                        Attempt::Done(new_count)
                    } else {
                        Attempt::Contended
                    }
                }
            };
            match attempt {
                Attempt::Done(count) => {
                    type_info.cache_store(&record);
                    return Ok(count);
                }
                Attempt::Contended => {
                    RegistryStats::bump(&self.stats.kernel_cas_retries);
                    backoff.reset();
                }
                Attempt::Blocked => {
                    RegistryStats::bump(&self.stats.disturb_waits);
                    backoff.snooze();
                    guard.repin();
                }
            }
        }
    }

    /// Drop a handle's reference count, returning the new total count
    ///
    /// The final release runs the class `free_func` under the record's
    /// do-not-disturb token, then marks the record. A failing `free_func`
    /// still marks (this is an always-close path) and surfaces
    /// `CallbackFailed`.
    pub fn dec_ref(&self, handle: Handle, app_ref: bool) -> RegistryResult<u32> {
        let _activity = self.enter(EntryKind::Public);
        self.dec_ref_impl(handle, app_ref, None)
    }

    /// `dec_ref` with an async request token threaded through to `free_func`
    pub fn dec_ref_async(
        &self,
        handle: Handle,
        app_ref: bool,
        request: Option<&AsyncRequest>,
    ) -> RegistryResult<u32> {
        let _activity = self.enter(EntryKind::Public);
        self.dec_ref_impl(handle, app_ref, request)
    }

    pub(super) fn dec_ref_impl(
        &self,
        handle: Handle,
        app_ref: bool,
        request: Option<&AsyncRequest>,
    ) -> RegistryResult<u32> {
        RegistryStats::bump(&self.stats.dec_refs);
        let (tag, type_info, record, _) = self.resolve(handle)?;
        let class = Arc::clone(type_info.class());
        let has_free = class.free_func.is_some();

        let mut backoff = Backoff::new();
        let mut guard = epoch::pin();
        loop {
            let attempt = {
                let (shared, kernel) = record.kernel(&guard);
                if kernel.marked {
                    return Err(RegistryError::NotFound(handle));
                }
                if kernel.token_held() && !self.may_bypass(kernel) {
                    Attempt::Blocked
                } else {
                    if kernel.token_held() {
                        RegistryStats::bump(&self.stats.disturb_bypasses);
                    }
                    if kernel.count == 0 {
                        return Err(RegistryError::Internal(format!(
                            "handle {:#x} live with zero count",
                            handle
                        )));
                    }
                    let new_count = kernel.count - 1;
                    if new_count >= 1 || !has_free {
                        // Single-CAS path: plain decrement, or a final
                        // release with no release action beyond marking
                        let next = if new_count >= 1 {
                            let mut next = kernel.clone();
                            next.count = new_count;
                            if app_ref {
                                next.app_count = next.app_count.saturating_sub(1);
                            }
                            // app_count is a subset of count; a non-app
                            // release of an app-referenced record eats an
                            // application reference rather than break that
                            next.app_count = next.app_count.min(next.count);
                            next
                        } else {
                            IdKernel::dead()
                        };
                        if record.try_commit(shared, next, &guard) {
                            Attempt::Done(DecOutcome::Count(new_count))
                        } else {
                            Attempt::Contended
                        }
                    } else {
                        // Final release with a free_func: secure the token
                        let (needs_lock, holds_lock) = self.callback_locking(&class);
                        if record.try_commit(shared, kernel.with_token(holds_lock), &guard) {
                            Attempt::Done(DecOutcome::TokenHeld { needs_lock })
                        } else {
                            Attempt::Contended
                        }
                    }
                }
            };
            match attempt {
                Attempt::Done(DecOutcome::Count(count)) => {
                    if count == 0 {
                        self.post_mark_bookkeeping(tag, &type_info, &record);
                    }
                    return Ok(count);
                }
                Attempt::Done(DecOutcome::TokenHeld { needs_lock }) => {
                    drop(guard);
                    return self.release_with_free_func(
                        handle, tag, &type_info, &record, &class, needs_lock, request,
                    );
                }
                Attempt::Contended => {
                    RegistryStats::bump(&self.stats.kernel_cas_retries);
                    backoff.reset();
                }
                Attempt::Blocked => {
                    RegistryStats::bump(&self.stats.disturb_waits);
                    backoff.snooze();
                    guard.repin();
                }
            }
        }
    }

    /// Final-release tail: token is held by this thread
    fn release_with_free_func(
        &self,
        handle: Handle,
        tag: TypeTag,
        type_info: &Arc<TypeInfo>,
        record: &Arc<IdInfo>,
        class: &Arc<TypeClass>,
        needs_lock: bool,
        request: Option<&AsyncRequest>,
    ) -> RegistryResult<u32> {
        let object = {
            let guard = epoch::pin();
            let (_, kernel) = record.kernel(&guard);
            self.expect_object(kernel, handle)?
        };

        RegistryStats::bump(&self.stats.free_func_calls);
        let free_func = class
            .free_func
            .as_ref()
            .ok_or_else(|| RegistryError::Internal("free_func vanished".into()))?;
        let callback_result = {
            let _api = needs_lock.then(|| self.api_lock.lock());
            free_func(object, request)
        };

        // The token excluded every other writer; the marked kernel goes in
        // regardless of the callback verdict (always-close path)
        self.finish_release(tag, type_info, record);

        match callback_result {
            Ok(()) => Ok(0),
            Err(err) => {
                RegistryStats::bump(&self.stats.free_func_failures);
                warn!("free_func failed for handle {:#x}: {}", handle, err);
                Err(RegistryError::CallbackFailed(format!(
                    "free_func for handle {:#x}: {}",
                    handle, err
                )))
            }
        }
    }

    /// Install the terminal kernel and do the post-mark bookkeeping
    ///
    /// Idempotent across reentrant frames: only the frame that performs the
    /// marked transition deletes and retires.
    pub(super) fn finish_release(
        &self,
        tag: TypeTag,
        type_info: &Arc<TypeInfo>,
        record: &Arc<IdInfo>,
    ) {
        {
            let guard = epoch::pin();
            let (_, kernel) = record.kernel(&guard);
            if kernel.marked {
                return;
            }
            record.commit_owned(IdKernel::dead(), &guard);
        }
        self.post_mark_bookkeeping(tag, type_info, record);
    }

    /// Bookkeeping owed by whichever frame performed the marked transition
    pub(super) fn post_mark_bookkeeping(
        &self,
        tag: TypeTag,
        type_info: &Arc<TypeInfo>,
        record: &Arc<IdInfo>,
    ) {
        type_info.dec_id_count();
        type_info.cache_invalidate(record);
        if self.marking[tag].load(Ordering::SeqCst) == 0 {
            if let Some(stale) = type_info.table().delete(record.handle() as u64) {
                self.id_free.retire(stale);
            }
        }
    }

    /// Unconditionally mark a record, returning its object
    ///
    /// The "last dec_ref" shape without the count walk-down and without
    /// invoking `free_func`.
    pub fn remove(&self, handle: Handle) -> RegistryResult<Object> {
        let _activity = self.enter(EntryKind::Public);
        self.remove_impl(handle)
    }

    pub(super) fn remove_impl(&self, handle: Handle) -> RegistryResult<Object> {
        RegistryStats::bump(&self.stats.removes);
        let (tag, type_info, record, _) = self.resolve(handle)?;

        let mut backoff = Backoff::new();
        let mut guard = epoch::pin();
        loop {
            let attempt = {
                let (shared, kernel) = record.kernel(&guard);
                if kernel.marked {
                    return Err(RegistryError::NotFound(handle));
                }
                if kernel.token_held() && !self.may_bypass(kernel) {
                    Attempt::Blocked
                } else if kernel.token_held() {
                    // Reentrancy bypass: the token belongs to an outer
                    // frame of this thread; replace the kernel in place
                    RegistryStats::bump(&self.stats.disturb_bypasses);
                    let object = self.expect_object(kernel, handle)?;
                    if record.try_commit(shared, IdKernel::dead(), &guard) {
                        Attempt::Done(object)
                    } else {
                        Attempt::Contended
                    }
                } else {
                    let holds_lock = self.api_lock.held_by_current_thread();
                    let object = self.expect_object(kernel, handle)?;
                    if record.try_commit(shared, kernel.with_token(holds_lock), &guard) {
                        record.commit_owned(IdKernel::dead(), &guard);
                        Attempt::Done(object)
                    } else {
                        Attempt::Contended
                    }
                }
            };
            match attempt {
                Attempt::Done(object) => {
                    self.post_mark_bookkeeping(tag, &type_info, &record);
                    return Ok(object);
                }
                Attempt::Contended => {
                    RegistryStats::bump(&self.stats.kernel_cas_retries);
                    backoff.reset();
                }
                Attempt::Blocked => {
                    RegistryStats::bump(&self.stats.disturb_waits);
                    backoff.snooze();
                    guard.repin();
                }
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Total reference count of a live handle
    pub fn ref_count(&self, handle: Handle) -> RegistryResult<u32> {
        let _activity = self.enter(EntryKind::Public);
        let (_, _, record, _) = self.resolve(handle)?;
        let guard = epoch::pin();
        let (_, kernel) = record.kernel(&guard);
        if kernel.marked {
            return Err(RegistryError::NotFound(handle));
        }
        Ok(kernel.count)
    }

    /// Application-visible reference count of a live handle
    pub fn app_ref_count(&self, handle: Handle) -> RegistryResult<u32> {
        let _activity = self.enter(EntryKind::Public);
        let (_, _, record, _) = self.resolve(handle)?;
        let guard = epoch::pin();
        let (_, kernel) = record.kernel(&guard);
        if kernel.marked {
            return Err(RegistryError::NotFound(handle));
        }
        Ok(kernel.app_count)
    }

    /// Validated type tag of a handle
    pub fn handle_type(&self, handle: Handle) -> RegistryResult<TypeTag> {
        let _activity = self.enter(EntryKind::Public);
        let tag = self.tag_of_handle(handle)?;
        if self.types[tag].load().is_none() {
            return Err(RegistryError::BadGroup(tag));
        }
        Ok(tag)
    }

    /// True when the handle names a live, unmarked record
    pub fn is_valid(&self, handle: Handle) -> bool {
        let _activity = self.enter(EntryKind::Public);
        let Ok((_, _, record, _)) = self.resolve(handle) else {
            return false;
        };
        let guard = epoch::pin();
        let (_, kernel) = record.kernel(&guard);
        !kernel.marked
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::from_counters(&self.stats);
        snapshot.active_threads = self.activity.active();
        snapshot.max_active_threads = self.activity.max_active();
        snapshot.public_entries = self.activity.public_entries();
        snapshot.internal_entries = self.activity.internal_entries();
        snapshot.id_freelist_len = self.id_free.len() as u64;
        snapshot.id_freelist_reallocable = self.id_free.reallocable() as u64;
        snapshot.id_freelist_retired = self.id_free.retired_total();
        snapshot.id_freelist_reused = self.id_free.reused_total();
        snapshot.id_freelist_trimmed = self.id_free.trimmed_total();
        snapshot.type_freelist_len = self.type_free.len() as u64;
        snapshot.type_freelist_reallocable = self.type_free.reallocable() as u64;
        snapshot.type_freelist_retired = self.type_free.retired_total();
        snapshot.type_freelist_reused = self.type_free.reused_total();
        snapshot.type_freelist_trimmed = self.type_free.trimmed_total();
        snapshot
    }

    /// Write every statistics counter to the sink
    pub fn dump_stats(&self, sink: &mut dyn io::Write) -> io::Result<()> {
        self.stats_snapshot().dump(sink)
    }

    /// Write the non-zero statistics counters to the sink
    pub fn dump_nonzero_stats(&self, sink: &mut dyn io::Write, tag: &str) -> io::Result<()> {
        self.stats_snapshot().dump_nonzero(sink, tag)
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    pub(super) fn validate_tag(&self, tag: TypeTag) -> RegistryResult<()> {
        if tag == 0 || tag >= MAX_TYPES {
            return Err(RegistryError::bad_tag(tag));
        }
        Ok(())
    }

    /// Live type info for a tag
    pub(super) fn type_info(&self, tag: TypeTag) -> RegistryResult<Arc<TypeInfo>> {
        self.validate_tag(tag)?;
        match &*self.types[tag].load() {
            Some(type_info) if !type_info.is_cleared() => Ok(Arc::clone(type_info)),
            _ => Err(RegistryError::BadGroup(tag)),
        }
    }

    pub(super) fn tag_of_handle(&self, handle: Handle) -> RegistryResult<TypeTag> {
        if handle <= 0 {
            return Err(RegistryError::bad_handle(handle));
        }
        let tag = type_of(handle);
        if tag == 0 || tag >= MAX_TYPES {
            return Err(RegistryError::bad_handle(handle));
        }
        Ok(tag)
    }

    pub(super) fn type_info_for_handle(
        &self,
        handle: Handle,
    ) -> RegistryResult<(TypeTag, Arc<TypeInfo>)> {
        let tag = self.tag_of_handle(handle)?;
        let type_info = self.type_info(tag)?;
        Ok((tag, type_info))
    }

    /// Resolve a handle to its record, cache first
    pub(super) fn resolve(
        &self,
        handle: Handle,
    ) -> RegistryResult<(TypeTag, Arc<TypeInfo>, Arc<IdInfo>, bool)> {
        let (tag, type_info) = self.type_info_for_handle(handle)?;
        if let Some(record) = type_info.cached(handle) {
            return Ok((tag, type_info, record, true));
        }
        match type_info.table().find(handle as u64) {
            Some(record) => Ok((tag, type_info, record, false)),
            None => Err(RegistryError::NotFound(handle)),
        }
    }

    /// Reentrancy bypass check
    ///
    /// A held token may be ignored when its holder owned the API lock and
    /// so does the current thread: the lock already serializes the two
    /// frames, and stalling here would deadlock a callback that reenters
    /// the registry for the same handle.
    #[inline]
    pub(super) fn may_bypass(&self, kernel: &IdKernel) -> bool {
        matches!(
            kernel.disturb,
            Disturb::Held {
                holds_api_lock: true
            }
        ) && self.api_lock.held_by_current_thread()
    }

    /// API-lock policy for invoking a class callback
    ///
    /// Returns `(needs_lock, holds_lock)`: whether the callback must be
    /// bracketed, and whether the token should record lock ownership.
    pub(super) fn callback_locking(&self, class: &TypeClass) -> (bool, bool) {
        let held = self.api_lock.held_by_current_thread();
        let needs_lock = !class.is_mt_safe() && !held;
        (needs_lock, held || needs_lock)
    }

    fn expect_object(&self, kernel: &IdKernel, handle: Handle) -> RegistryResult<Object> {
        kernel.object.clone().ok_or_else(|| {
            RegistryError::Internal(format!("unmarked handle {:#x} without object", handle))
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII active-thread bracket
///
/// Dropping the guard is the exit half of the bookkeeping: the last thread
/// out promotes the free lists after a double-checked quiescence snapshot.
pub(super) struct ActivityGuard<'a> {
    registry: &'a Registry,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        if self.registry.activity.exit_quiescent() {
            self.registry.id_free.promote_all();
            self.registry.type_free.promote_all();
        }
    }
}
