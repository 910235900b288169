/*!
 * Retirement Free Lists
 *
 * Retired records park on a lock-free FIFO until a quiescent period has
 * been observed, then become eligible for reuse. A record retired while
 * readers may still hold table references is never handed back to a caller
 * until the registry's active-thread count has been seen at zero at least
 * once since retirement: `promote_all` (driven by exit bookkeeping) raises
 * `reallocable` to the queue length observed during the quiescent window,
 * and `try_reuse` only pops while `reallocable` is positive. FIFO order
 * makes the head the oldest, hence safest, entry.
 */

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Quiescent-state reclamation list for one record type
pub struct FreeList<T> {
    queue: SegQueue<Arc<T>>,
    /// Records currently parked
    len: AtomicUsize,
    /// Prefix of the queue known to predate a quiescent window
    reallocable: AtomicUsize,
    /// Trim threshold; past this, fully-quiescent surplus is freed
    max_desired: usize,
    retired: AtomicU64,
    reused: AtomicU64,
    trimmed: AtomicU64,
}

impl<T> FreeList<T> {
    pub fn new(max_desired: usize) -> Self {
        Self {
            queue: SegQueue::new(),
            len: AtomicUsize::new(0),
            reallocable: AtomicUsize::new(0),
            max_desired,
            retired: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            trimmed: AtomicU64::new(0),
        }
    }

    /// Park a retired record
    ///
    /// Opportunistically trims the list when both the length and the
    /// reallocable prefix exceed the desired ceiling, so the trimmed entry
    /// is guaranteed quiescent and can be freed outright.
    pub fn retire(&self, record: Arc<T>) {
        self.queue.push(record);
        self.len.fetch_add(1, Ordering::SeqCst);
        self.retired.fetch_add(1, Ordering::Relaxed);

        if self.len.load(Ordering::SeqCst) > self.max_desired {
            let claim = self.reallocable.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |r| if r > self.max_desired { Some(r - 1) } else { None },
            );
            if claim.is_ok() {
                match self.queue.pop() {
                    Some(old) => {
                        self.len.fetch_sub(1, Ordering::SeqCst);
                        self.trimmed.fetch_add(1, Ordering::Relaxed);
                        drop(old);
                    }
                    // Queue drained ahead of the counters; give the claim back
                    None => {
                        self.reallocable.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
    }

    /// Take a quiescent record for reuse, if one is available
    ///
    /// Returns the record by value; the caller reinitializes it. `None`
    /// means the caller should allocate from the heap instead. A popped
    /// record that still has outstanding references (the MRU cache, an
    /// in-flight reader) is parked again rather than handed out.
    pub fn try_reuse(&self) -> Option<T> {
        self.reallocable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1))
            .ok()?;

        let record = match self.queue.pop() {
            Some(record) => record,
            // Counters ran ahead of the queue; stay conservative
            None => return None,
        };
        self.len.fetch_sub(1, Ordering::SeqCst);

        match Arc::try_unwrap(record) {
            Ok(owned) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                Some(owned)
            }
            Err(still_shared) => {
                // Re-park at the tail; it re-qualifies at the next promotion
                self.queue.push(still_shared);
                self.len.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    /// Mark every currently-parked record reallocable
    ///
    /// Called only from exit bookkeeping after a double-checked observation
    /// of zero active threads. A compare-exchange collision skips the
    /// promotion; another quiescent window will come.
    pub fn promote_all(&self) {
        let len = self.len.load(Ordering::SeqCst);
        let reallocable = self.reallocable.load(Ordering::SeqCst);
        if len > reallocable {
            let _ = self.reallocable.compare_exchange(
                reallocable,
                len,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn reallocable(&self) -> usize {
        self.reallocable.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn retired_total(&self) -> u64 {
        self.retired.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reused_total(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn trimmed_total(&self) -> u64 {
        self.trimmed.load(Ordering::Relaxed)
    }
}
