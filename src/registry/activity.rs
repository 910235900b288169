/*!
 * Enter/Exit Bookkeeping
 *
 * Every public entry into the registry brackets itself with an RAII guard
 * that maintains the active-thread count. The last thread out takes a
 * double-checked snapshot; if the count is still zero and no entry slipped
 * in while snapshotting, the free lists' parked records are promoted to
 * reallocable. This is the quiescent-state side of safe memory
 * reclamation: a reader always raises the count before dereferencing
 * anything obtained from a handle table.
 */

use std::sync::atomic::{AtomicU64, Ordering};

/// Classification of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Entered through the public operation surface
    Public,
    /// Nested entry made by the registry on its own behalf
    Internal,
}

/// Active-thread counter plus entry statistics
pub struct ActivityTracker {
    active: AtomicU64,
    public_entries: AtomicU64,
    internal_entries: AtomicU64,
    max_active: AtomicU64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            active: AtomicU64::new(0),
            public_entries: AtomicU64::new(0),
            internal_entries: AtomicU64::new(0),
            max_active: AtomicU64::new(0),
        }
    }

    /// Raise the active-thread count and classify the entry
    pub fn enter(&self, kind: EntryKind) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        match kind {
            EntryKind::Public => self.public_entries.fetch_add(1, Ordering::SeqCst),
            EntryKind::Internal => self.internal_entries.fetch_add(1, Ordering::SeqCst),
        };
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    /// Drop the active-thread count; true when a quiescent window was
    /// observed and the caller should promote the free lists
    ///
    /// The snapshot is double-checked: both entry counters must be
    /// unchanged across the re-read of the active count, otherwise a new
    /// thread may have entered and already exited, invalidating the window.
    pub fn exit_quiescent(&self) -> bool {
        let prev = self.active.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0);
        if prev != 1 {
            return false;
        }

        let public_snapshot = self.public_entries.load(Ordering::SeqCst);
        let internal_snapshot = self.internal_entries.load(Ordering::SeqCst);

        if self.active.load(Ordering::SeqCst) != 0 {
            return false;
        }

        self.public_entries.load(Ordering::SeqCst) == public_snapshot
            && self.internal_entries.load(Ordering::SeqCst) == internal_snapshot
    }

    #[inline]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn public_entries(&self) -> u64 {
        self.public_entries.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn internal_entries(&self) -> u64 {
        self.internal_entries.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn max_active(&self) -> u64 {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_thread_window() {
        let tracker = ActivityTracker::new();
        tracker.enter(EntryKind::Public);
        assert_eq!(tracker.active(), 1);
        assert!(tracker.exit_quiescent());
        assert_eq!(tracker.active(), 0);
        assert_eq!(tracker.public_entries(), 1);
    }

    #[test]
    fn test_nested_entries_defer_promotion() {
        let tracker = ActivityTracker::new();
        tracker.enter(EntryKind::Public);
        tracker.enter(EntryKind::Internal);
        assert!(!tracker.exit_quiescent(), "still one thread inside");
        assert!(tracker.exit_quiescent());
        assert_eq!(tracker.internal_entries(), 1);
    }

    #[test]
    fn test_max_active_high_water_mark() {
        let tracker = Arc::new(ActivityTracker::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let tracker = Arc::clone(&tracker);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    tracker.enter(EntryKind::Public);
                    tracker.exit_quiescent();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.active(), 0);
        assert!(tracker.max_active() >= 1);
        assert_eq!(tracker.public_entries(), 8000);
    }
}
