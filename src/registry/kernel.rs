/*!
 * ID Kernel
 *
 * The kernel carries all mutable state of one record and is replaced
 * wholesale at every transition: readers take a snapshot, build a modified
 * copy, and commit it with a single compare-exchange. The do-not-disturb
 * token is a sum type rather than a flag pair so the "who may write"
 * question has exactly one answer per state.
 *
 * State machine over `(marked, disturb, is_future)`:
 *
 * - Live regular `(F, Open, F)` → token-held `(F, Held, F)` → back, or
 *   → marked `(T, Open, F)` on final release / forced clear
 * - Live future `(F, Open, T)` → token-held `(F, Held, T)` toward
 *   realization → live regular on success
 * - Marked is terminal; `marked = true → false` never happens
 */

use crate::core::types::Object;

/// Do-not-disturb serialization token
///
/// At most one thread observes the `Open → Held` edge for a given kernel;
/// that thread is the only legal writer until it restores `Open` (or
/// installs the terminal marked kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disturb {
    /// Any thread may attempt a compare-exchange
    Open,
    /// One thread is running a non-rollbackable callback
    Held {
        /// The holder owned the outer API lock when it took the token;
        /// enables the reentrancy bypass
        holds_api_lock: bool,
    },
}

/// All mutable state of one record, committed as a unit
#[derive(Clone)]
pub struct IdKernel {
    /// Total reference count
    pub count: u32,
    /// Subset of `count` attributable to application references
    pub app_count: u32,
    /// Caller payload; `None` only once marked
    pub object: Option<Object>,
    /// Logical deletion; terminal
    pub marked: bool,
    /// Single-writer serialization token
    pub disturb: Disturb,
    /// Record stands in for a not-yet-realized object
    pub is_future: bool,
}

impl IdKernel {
    /// Initial kernel of a fresh registration
    pub fn live(object: Object, app_ref: bool, is_future: bool) -> Self {
        Self {
            count: 1,
            app_count: app_ref as u32,
            object: Some(object),
            marked: false,
            disturb: Disturb::Open,
            is_future,
        }
    }

    /// Terminal kernel installed at final release / removal / sweep
    pub fn dead() -> Self {
        Self {
            count: 0,
            app_count: 0,
            object: None,
            marked: true,
            disturb: Disturb::Open,
            is_future: false,
        }
    }

    /// Copy with the token taken by the calling thread
    pub fn with_token(&self, holds_api_lock: bool) -> Self {
        let mut next = self.clone();
        next.disturb = Disturb::Held { holds_api_lock };
        next
    }

    /// Copy with the token restored to open
    pub fn with_token_released(&self) -> Self {
        let mut next = self.clone();
        next.disturb = Disturb::Open;
        next
    }

    #[inline]
    pub fn token_held(&self) -> bool {
        matches!(self.disturb, Disturb::Held { .. })
    }

    /// Structural sanity check; used by debug assertions and tests
    pub fn is_consistent(&self) -> bool {
        if self.app_count > self.count {
            return false;
        }
        if self.marked {
            self.count == 0
                && self.app_count == 0
                && self.object.is_none()
                && self.disturb == Disturb::Open
                && !self.is_future
        } else {
            self.object.is_some()
        }
    }
}

impl std::fmt::Debug for IdKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdKernel")
            .field("count", &self.count)
            .field("app_count", &self.app_count)
            .field("object", &self.object.is_some())
            .field("marked", &self.marked)
            .field("disturb", &self.disturb)
            .field("is_future", &self.is_future)
            .finish()
    }
}
