/*!
 * Type Class Descriptors
 * Immutable per-type configuration supplied by the caller of register_type
 */

use crate::core::types::{FreeFunc, TypeTag, UnwrapFunc};
use std::fmt;

/// Class flag: descriptor belongs to an application-defined type
///
/// Application classes must use tags reserved through
/// `Registry::reserve_type_tag`.
pub const CLASS_IS_APPLICATION: u32 = 0x01;

/// Class flag: callbacks are safe to invoke without the outer API lock
pub const CLASS_IS_MT_SAFE: u32 = 0x02;

/// Immutable descriptor of one registered type
///
/// Owned by the registry once `register_type` accepts it; dropped when the
/// type is destroyed and the last in-flight reference drains.
pub struct TypeClass {
    /// Desired type slot
    pub tag: TypeTag,
    /// Starting value of the per-type index allocator
    pub reserved: u64,
    /// `CLASS_IS_APPLICATION` | `CLASS_IS_MT_SAFE`
    pub flags: u32,
    /// Invoked at final release of each record; `None` means records are
    /// dropped without a release action
    pub free_func: Option<FreeFunc>,
    /// Extractor for classes whose stored object is an indirection
    pub unwrap_func: Option<UnwrapFunc>,
}

impl TypeClass {
    /// Minimal class with no callbacks
    pub fn new(tag: TypeTag) -> Self {
        Self {
            tag,
            reserved: 0,
            flags: 0,
            free_func: None,
            unwrap_func: None,
        }
    }

    #[inline]
    pub fn is_application(&self) -> bool {
        self.flags & CLASS_IS_APPLICATION != 0
    }

    #[inline]
    pub fn is_mt_safe(&self) -> bool {
        self.flags & CLASS_IS_MT_SAFE != 0
    }
}

impl fmt::Debug for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeClass")
            .field("tag", &self.tag)
            .field("reserved", &self.reserved)
            .field("flags", &self.flags)
            .field("free_func", &self.free_func.is_some())
            .field("unwrap_func", &self.unwrap_func.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut class = TypeClass::new(3);
        assert!(!class.is_application());
        assert!(!class.is_mt_safe());

        class.flags = CLASS_IS_APPLICATION | CLASS_IS_MT_SAFE;
        assert!(class.is_application());
        assert!(class.is_mt_safe());
    }
}
