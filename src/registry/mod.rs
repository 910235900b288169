/*!
 * Identifier Registry
 *
 * Opaque integer handles for library objects, with per-handle reference
 * counts and safe concurrent lookup, registration, and release across
 * threads without a global lock.
 *
 * # Module Organization
 *
 * - **class**, **kernel**, **info**, **type_info**: the data model
 * - **table**: hash-table adapter keyed by handle value
 * - **freelist**, **activity**: quiescent-state memory reclamation
 * - **registry**: the operation surface (registration, lookup, counting)
 * - **future**, **iterate**, **clear**: realization, iteration, sweep
 * - **stats**: observational counters
 */

pub mod activity;
pub mod class;
pub mod clear;
pub mod freelist;
pub mod future;
pub mod info;
pub mod iterate;
pub mod kernel;
pub mod registry;
pub mod stats;
pub mod table;
pub mod type_info;

pub use class::{TypeClass, CLASS_IS_APPLICATION, CLASS_IS_MT_SAFE};
pub use kernel::{Disturb, IdKernel};
pub use registry::Registry;
pub use stats::StatsSnapshot;
