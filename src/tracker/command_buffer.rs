use std::collections::HashSet;

use ash::vk;

/// Bookkeeping record for one command buffer.
///
/// `memory_refs` is the deduplicated set of allocations the recorded
/// commands depend on. The submission marker ties the buffer to the
/// fence id it was last submitted under; id 0 means never submitted.
pub struct CommandBufferInfo {
    handle: vk::CommandBuffer,
    memory_refs: HashSet<vk::DeviceMemory>,
    fence_id: u64,
    last_queue: Option<vk::Queue>,
    last_fence: Option<vk::Fence>,
}

impl CommandBufferInfo {
    pub fn new(handle: vk::CommandBuffer) -> Self {
        Self {
            handle,
            memory_refs: HashSet::new(),
            fence_id: 0,
            last_queue: None,
            last_fence: None,
        }
    }

    pub fn get_handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn memory_refs(&self) -> &HashSet<vk::DeviceMemory> {
        &self.memory_refs
    }

    pub fn fence_id(&self) -> u64 {
        self.fence_id
    }

    pub fn last_queue(&self) -> Option<vk::Queue> {
        self.last_queue
    }

    pub fn last_fence(&self) -> Option<vk::Fence> {
        self.last_fence
    }

    pub(super) fn add_reference(&mut self, mem: vk::DeviceMemory) -> bool {
        self.memory_refs.insert(mem)
    }

    pub(super) fn remove_reference(&mut self, mem: vk::DeviceMemory) -> bool {
        self.memory_refs.remove(&mem)
    }

    pub(super) fn take_references(&mut self) -> HashSet<vk::DeviceMemory> {
        std::mem::take(&mut self.memory_refs)
    }

    pub(super) fn record_submission(
        &mut self,
        fence_id: u64,
        queue: vk::Queue,
        fence: Option<vk::Fence>,
    ) {
        self.fence_id = fence_id;
        self.last_queue = Some(queue);
        self.last_fence = fence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn references_are_deduplicated() {
        let mut info = CommandBufferInfo::new(vk::CommandBuffer::from_raw(1));
        let mem = vk::DeviceMemory::from_raw(9);

        assert!(info.add_reference(mem));
        assert!(!info.add_reference(mem));
        assert_eq!(info.memory_refs().len(), 1);

        let drained = info.take_references();
        assert_eq!(drained.len(), 1);
        assert!(info.memory_refs().is_empty());
    }

    #[test]
    fn submission_marker() {
        let mut info = CommandBufferInfo::new(vk::CommandBuffer::from_raw(1));
        assert_eq!(info.fence_id(), 0);
        assert!(info.last_queue().is_none());

        let queue = vk::Queue::from_raw(4);
        info.record_submission(17, queue, None);
        assert_eq!(info.fence_id(), 17);
        assert_eq!(info.last_queue(), Some(queue));
        assert_eq!(info.last_fence(), None);
    }
}
