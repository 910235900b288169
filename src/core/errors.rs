/*!
 * Error Types
 * Centralized error handling with thiserror
 */

use super::types::{Handle, TypeTag};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Type tag out of range: {0}")]
    BadRange(String),

    #[error("Type {0} is not registered")]
    BadGroup(TypeTag),

    #[error("Handle {0:#x} not found")]
    NotFound(Handle),

    #[error("Handle {0:#x} is backed by a live record")]
    InUse(Handle),

    #[error("Allocation failed: {0}")]
    AllocFailed(String),

    #[error("Callback failed: {0}")]
    CallbackFailed(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

impl RegistryError {
    /// BadRange with a formatted tag complaint
    pub(crate) fn bad_tag(tag: TypeTag) -> Self {
        RegistryError::BadRange(format!("type tag {} outside [1, MAX_TYPES)", tag))
    }

    /// BadRange for a handle whose tag field is unusable
    pub(crate) fn bad_handle(handle: Handle) -> Self {
        RegistryError::BadRange(format!("handle {:#x} encodes an invalid type", handle))
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
