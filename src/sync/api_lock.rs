/*!
 * Outer API Lock
 *
 * Stand-in for the embedding library's global API mutex. The registry core
 * touches it in exactly two situations: bracketing callbacks of classes
 * that are not marked MT-safe, and deciding whether the do-not-disturb
 * reentrancy bypass applies. Reentrant, with a current-thread ownership
 * query that the bypass logic depends on.
 */

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};

struct LockState {
    owner: Option<ThreadId>,
    depth: u32,
}

/// Reentrant mutex with ownership introspection
pub struct ApiLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl ApiLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                depth: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Acquire the lock, blocking until available; reentrant
    pub fn lock(&self) -> ApiLockGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => self.cond.wait(&mut state),
            }
        }
        ApiLockGuard { lock: self }
    }

    /// True when the calling thread currently owns the lock
    #[inline]
    pub fn held_by_current_thread(&self) -> bool {
        let state = self.state.lock();
        state.owner == Some(thread::current().id())
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.cond.notify_one();
        }
    }
}

impl Default for ApiLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard; releases one level of the reentrant lock on drop
pub struct ApiLockGuard<'a> {
    lock: &'a ApiLock,
}

impl Drop for ApiLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
