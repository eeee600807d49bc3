use std::collections::HashSet;

use ash::vk;

use crate::tracker::handles::ObjectHandle;

/// Immutable metadata captured when an allocation is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationDescriptor {
    pub size: vk::DeviceSize,
    pub memory_type_index: u32,
    pub property_flags: vk::MemoryPropertyFlags,
}

impl AllocationDescriptor {
    pub fn new(size: vk::DeviceSize, memory_type_index: u32) -> Self {
        Self {
            size,
            memory_type_index,
            property_flags: vk::MemoryPropertyFlags::empty(),
        }
    }

    pub fn with_properties(mut self, flags: vk::MemoryPropertyFlags) -> Self {
        self.property_flags = flags;
        self
    }
}

/// Bookkeeping record for one device memory allocation.
///
/// The reference count is the scalar source of truth and always equals
/// the combined size of the two holder sets. All mutation goes through
/// the methods below so that equality cannot drift.
pub struct MemoryInfo {
    handle: vk::DeviceMemory,
    allocation: Option<AllocationDescriptor>,
    ref_count: u32,
    bound_objects: HashSet<ObjectHandle>,
    command_buffers: HashSet<vk::CommandBuffer>,
}

impl MemoryInfo {
    /// `allocation` is `None` for swapchain owned memory, which is
    /// allocated by the driver and reported with no descriptor.
    pub fn new(handle: vk::DeviceMemory, allocation: Option<AllocationDescriptor>) -> Self {
        Self {
            handle,
            allocation,
            ref_count: 0,
            bound_objects: HashSet::new(),
            command_buffers: HashSet::new(),
        }
    }

    pub fn get_handle(&self) -> vk::DeviceMemory {
        self.handle
    }

    pub fn get_allocation(&self) -> Option<&AllocationDescriptor> {
        self.allocation.as_ref()
    }

    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.allocation.map(|allocation| allocation.size).unwrap_or(0)
    }

    pub fn is_swapchain_owned(&self) -> bool {
        self.allocation_size() == 0
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn bound_objects(&self) -> &HashSet<ObjectHandle> {
        &self.bound_objects
    }

    pub fn command_buffers(&self) -> &HashSet<vk::CommandBuffer> {
        &self.command_buffers
    }

    /// Adds an object holder. Returns false if the object was already
    /// bound, in which case the reference count is untouched.
    pub(super) fn bind_object(&mut self, object: ObjectHandle) -> bool {
        let inserted = self.bound_objects.insert(object);
        if inserted {
            self.ref_count += 1;
        }
        inserted
    }

    /// Removes an object holder. Returns false if the object was not in
    /// the set, which means an edge invariant was already broken.
    pub(super) fn unbind_object(&mut self, object: ObjectHandle) -> bool {
        let removed = self.bound_objects.remove(&object);
        if removed {
            self.ref_count -= 1;
        }
        removed
    }

    /// Adds a referencing command buffer, deduplicated.
    pub(super) fn add_command_buffer(&mut self, cb: vk::CommandBuffer) -> bool {
        let inserted = self.command_buffers.insert(cb);
        if inserted {
            self.ref_count += 1;
        }
        inserted
    }

    pub(super) fn remove_command_buffer(&mut self, cb: vk::CommandBuffer) -> bool {
        let removed = self.command_buffers.remove(&cb);
        if removed {
            self.ref_count -= 1;
        }
        removed
    }

    /// Forcibly drops every holder. Recovery path for a free that is
    /// executed while references remain.
    pub(super) fn clear_holders(&mut self) {
        self.bound_objects.clear();
        self.command_buffers.clear();
        self.ref_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn ref_count_tracks_holder_sets() {
        let mut info = MemoryInfo::new(
            vk::DeviceMemory::from_raw(1),
            Some(AllocationDescriptor::new(4096, 0)),
        );
        let object = ObjectHandle::from_raw(10);
        let cb = vk::CommandBuffer::from_raw(20);

        assert!(info.bind_object(object));
        assert!(!info.bind_object(object));
        assert!(info.add_command_buffer(cb));
        assert!(!info.add_command_buffer(cb));
        assert_eq!(info.ref_count(), 2);

        assert!(info.unbind_object(object));
        assert!(!info.unbind_object(object));
        assert!(info.remove_command_buffer(cb));
        assert_eq!(info.ref_count(), 0);
    }

    #[test]
    fn swapchain_owned_memory_has_zero_size() {
        let info = MemoryInfo::new(vk::DeviceMemory::from_raw(2), None);
        assert!(info.is_swapchain_owned());
        assert_eq!(info.allocation_size(), 0);

        let info = MemoryInfo::new(
            vk::DeviceMemory::from_raw(3),
            Some(AllocationDescriptor::new(128, 1)),
        );
        assert!(!info.is_swapchain_owned());
    }
}
