use std::fmt::{Debug, Formatter};

use ash::vk;
use ash::vk::Handle;

/// Type erased handle of a driver created object.
///
/// The tracker shadows many kinds of objects (buffers, images, views,
/// fences, ...) in a single table, so their typed handles are erased to
/// the underlying raw value. Comparing and hashing erased handles is
/// cheap; the kind tag lives on the record, not the handle.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub const NULL: ObjectHandle = ObjectHandle(0);

    pub fn from_handle<H: Handle>(handle: H) -> Self {
        Self(handle.as_raw())
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Reinterprets the erased handle as a typed one. Only valid when the
    /// record's kind says so.
    pub fn as_typed<H: Handle>(&self) -> H {
        H::from_raw(self.0)
    }
}

impl<H: Handle> From<H> for ObjectHandle {
    fn from(handle: H) -> Self {
        Self::from_handle(handle)
    }
}

impl Debug for ObjectHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("ObjectHandle({:#018X})", self.0))
    }
}

// An erased handle must stay exactly as wide as the raw handle value.
assert_eq_size!(ObjectHandle, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let buffer = vk::Buffer::from_raw(0xABCD);
        let handle = ObjectHandle::from(buffer);
        assert_eq!(handle.as_raw(), 0xABCD);
        assert_eq!(handle.as_typed::<vk::Buffer>(), buffer);
        assert!(!handle.is_null());
        assert!(ObjectHandle::NULL.is_null());
    }

    #[test]
    fn erased_handles_compare_by_raw_value() {
        let a = ObjectHandle::from(vk::Image::from_raw(7));
        let b = ObjectHandle::from(vk::Buffer::from_raw(7));
        // Different source types, same raw value: the erased handles are
        // equal, which is exactly the single-table lookup semantic.
        assert_eq!(a, b);
    }
}
