/*!
 * Handle Registry Library
 * Multi-threaded identifier registry for scientific data library objects
 */

pub mod core;
pub mod registry;
pub mod sync;

// Re-exports
pub use crate::core::errors::{RegistryError, RegistryResult};
pub use crate::core::handle::{encode, index_of, type_of, INVALID_HANDLE};
pub use crate::core::types::{
    lib_type, AsyncRequest, DiscardFunc, FreeFunc, Handle, Object, RealizeFunc, TypeTag,
    UnwrapFunc, VisitAction,
};
pub use crate::registry::{
    Registry, StatsSnapshot, TypeClass, CLASS_IS_APPLICATION, CLASS_IS_MT_SAFE,
};
pub use crate::sync::ApiLock;
