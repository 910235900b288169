/*!
 * ID Info Records
 *
 * One record per live handle. The mutable state lives behind an epoch
 * managed pointer: every transition allocates a fresh kernel, commits it
 * with compare-exchange, and retires the superseded kernel through the
 * epoch collector so concurrent readers never observe a freed snapshot.
 */

use super::kernel::IdKernel;
use crate::core::types::{DiscardFunc, Handle, Object, RealizeFunc};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use std::sync::atomic::Ordering;

/// Internal record backing one handle
pub struct IdInfo {
    /// Handle value; immutable between (re)constructions
    handle: Handle,
    /// Future-handle resolver; `None` for regular records
    realize: Option<RealizeFunc>,
    /// Placeholder release; `None` for regular records
    discard: Option<DiscardFunc>,
    /// All mutable state, swapped as a unit
    kernel: Atomic<IdKernel>,
}

impl IdInfo {
    pub fn new(
        handle: Handle,
        object: Object,
        app_ref: bool,
        realize: Option<RealizeFunc>,
        discard: Option<DiscardFunc>,
    ) -> Self {
        let is_future = realize.is_some();
        Self {
            handle,
            realize,
            discard,
            kernel: Atomic::new(IdKernel::live(object, app_ref, is_future)),
        }
    }

    /// Reinitialize a record recycled from the free list
    ///
    /// Caller owns the record exclusively, so the kernel swap cannot race.
    pub fn reinit(
        &mut self,
        handle: Handle,
        object: Object,
        app_ref: bool,
        realize: Option<RealizeFunc>,
        discard: Option<DiscardFunc>,
    ) {
        let is_future = realize.is_some();
        self.handle = handle;
        self.realize = realize;
        self.discard = discard;
        let fresh = Owned::new(IdKernel::live(object, app_ref, is_future));
        // Exclusive ownership: no concurrent readers, drop the old kernel now
        unsafe {
            let guard = epoch::unprotected();
            let old = self.kernel.swap(fresh, Ordering::SeqCst, guard);
            if !old.is_null() {
                drop(old.into_owned());
            }
        }
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn realize_func(&self) -> Option<&RealizeFunc> {
        self.realize.as_ref()
    }

    #[inline]
    pub fn discard_func(&self) -> Option<&DiscardFunc> {
        self.discard.as_ref()
    }

    /// Snapshot the current kernel
    ///
    /// The returned reference lives as long as the epoch guard; the shared
    /// pointer is the expected value for a subsequent [`IdInfo::try_commit`].
    #[inline]
    pub fn kernel<'g>(&self, guard: &'g Guard) -> (Shared<'g, IdKernel>, &'g IdKernel) {
        let shared = self.kernel.load(Ordering::SeqCst, guard);
        // The kernel pointer is installed at construction and only ever
        // replaced, never nulled, while the record is reachable
        let kernel = unsafe { shared.deref() };
        (shared, kernel)
    }

    /// Attempt to commit a modified kernel; the linearization point
    ///
    /// Returns true and retires the superseded snapshot on success; false
    /// when another thread committed first.
    pub fn try_commit(&self, current: Shared<'_, IdKernel>, next: IdKernel, guard: &Guard) -> bool {
        match self.kernel.compare_exchange(
            current,
            Owned::new(next),
            Ordering::SeqCst,
            Ordering::SeqCst,
            guard,
        ) {
            Ok(_) => {
                unsafe { guard.defer_destroy(current) };
                true
            }
            Err(_) => false,
        }
    }

    /// Replace the kernel unconditionally
    ///
    /// Legal only while the calling thread holds the do-not-disturb token,
    /// which excludes every other writer.
    pub fn commit_owned(&self, next: IdKernel, guard: &Guard) {
        let old = self.kernel.swap(Owned::new(next), Ordering::SeqCst, guard);
        debug_assert!(!old.is_null());
        unsafe { guard.defer_destroy(old) };
    }
}

impl Drop for IdInfo {
    fn drop(&mut self) {
        // Last owner: reclaim the kernel allocation directly
        unsafe {
            let guard = epoch::unprotected();
            let cur = self.kernel.load(Ordering::Relaxed, guard);
            if !cur.is_null() {
                drop(cur.into_owned());
            }
        }
    }
}

impl std::fmt::Debug for IdInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdInfo")
            .field("handle", &format_args!("{:#x}", self.handle))
            .field("is_future", &self.realize.is_some())
            .finish()
    }
}
