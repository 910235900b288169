/*!
 * Registry Limits and Constants
 *
 * Centralized location for all registry-wide limits, thresholds, and magic
 * numbers. Values include rationale comments explaining WHY they exist.
 * Performance-critical constants are marked with [PERF].
 */

use std::time::Duration;

// =============================================================================
// HANDLE ENCODING
// =============================================================================

/// Bits of a handle reserved for the type tag
/// Together with `ID_BITS` this fills 63 bits; the sign bit is never set by
/// a valid encoding, so negative handles are free to signal errors
pub const TYPE_BITS: u32 = 7;

/// Bits of a handle reserved for the per-type index
pub const ID_BITS: u32 = 56;

/// Mask extracting the index field of a handle
pub const ID_MASK: i64 = (1 << ID_BITS) - 1;

/// Mask extracting the (shifted-down) type field of a handle
pub const TYPE_MASK: i64 = (1 << TYPE_BITS) - 1;

// =============================================================================
// TYPE TABLE
// =============================================================================

/// Total number of type slots (one per encodable tag)
pub const MAX_TYPES: usize = 1 << TYPE_BITS;

/// First tag available to application-defined types
/// Slots `[1, NUM_LIB_TYPES)` are claimed at registry construction for the
/// library object classes; slot 0 is reserved (tag of the invalid handle)
pub const NUM_LIB_TYPES: usize = 9;

// =============================================================================
// FREE LISTS
// =============================================================================

/// Desired steady-state length of each retirement free list
/// Retire opportunistically trims past this once enough entries are
/// reallocable; keeps reuse hits high without hoarding memory
/// [PERF] sized for bursty register/release workloads
pub const FREELIST_MAX_DESIRED: usize = 256;

// =============================================================================
// CONTENTION BACKOFF
// =============================================================================

/// Iterations of tight spinning before yielding the CPU
/// [PERF] do-not-disturb windows are normally a few hundred nanoseconds
pub const BACKOFF_SPIN_LIMIT: u32 = 10;

/// Iterations (spin + yield) before falling back to timed sleeps
pub const BACKOFF_YIELD_LIMIT: u32 = 50;

/// Ceiling on the exponential sleep phase
/// Bounds worst-case latency when a callback holds the token for a while
pub const BACKOFF_MAX_SLEEP: Duration = Duration::from_millis(1);
