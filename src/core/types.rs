/*!
 * Core Types
 * Common types used across the registry
 */

use super::errors::RegistryResult;
use std::any::Any;
use std::sync::Arc;

/// Opaque integer handle handed to callers; encodes `(type_tag, index)`
pub type Handle = i64;

/// Per-type slot tag; the high field of a handle
pub type TypeTag = usize;

/// Pointer-sized opaque payload naming a caller object
///
/// The registry never inspects the payload; identity (`Arc::ptr_eq`) is the
/// only comparison it performs.
pub type Object = Arc<dyn Any + Send + Sync>;

/// Opaque async request token threaded through to `free_func`
pub type AsyncRequest = Arc<dyn Any + Send + Sync>;

/// Final-release callback installed by a type class
///
/// Invoked exactly once per record, under the record's do-not-disturb token.
pub type FreeFunc = Box<dyn Fn(Object, Option<&AsyncRequest>) -> RegistryResult<()> + Send + Sync>;

/// Extractor for types whose stored object is an indirection
pub type UnwrapFunc = Box<dyn Fn(&Object) -> Object + Send + Sync>;

/// Resolves a future handle's placeholder into the actual handle
pub type RealizeFunc = Box<dyn Fn(&Object) -> RegistryResult<Handle> + Send + Sync>;

/// Releases a future handle's placeholder after realization
pub type DiscardFunc = Box<dyn Fn(&Object) -> RegistryResult<()> + Send + Sync>;

/// Visitor verdict for `iterate`
///
/// `Continue` keeps walking, `Stop` ends the walk successfully; an `Err`
/// from the visitor ends the walk and is returned verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    Continue,
    Stop,
}

/// Library object classes with reserved type slots
///
/// Application classes claim tags at `NUM_LIB_TYPES` and above via
/// `Registry::reserve_type_tag`.
pub mod lib_type {
    use super::TypeTag;

    pub const FILE: TypeTag = 1;
    pub const GROUP: TypeTag = 2;
    pub const DATATYPE: TypeTag = 3;
    pub const DATASPACE: TypeTag = 4;
    pub const DATASET: TypeTag = 5;
    pub const ATTRIBUTE: TypeTag = 6;
    pub const PROPERTY_LIST: TypeTag = 7;
    pub const EVENT_SET: TypeTag = 8;
}
