/*!
 * Synchronization Primitives
 *
 * Contention backoff for the kernel compare-exchange loops and the outer
 * API lock consumed by the non-MT-safe callback bracketing.
 */

pub mod api_lock;
pub mod backoff;

pub use api_lock::{ApiLock, ApiLockGuard};
pub use backoff::Backoff;
