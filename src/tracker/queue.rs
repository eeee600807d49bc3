use ash::vk;

/// Per queue submission and retirement watermarks.
///
/// Both counters are monotonic and `last_retired_id <= last_submitted_id`
/// holds between operations. A submission with an id at or below the
/// retirement watermark has completed.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueInfo {
    last_submitted_id: u64,
    last_retired_id: u64,
}

impl QueueInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_submitted_id(&self) -> u64 {
        self.last_submitted_id
    }

    pub fn last_retired_id(&self) -> u64 {
        self.last_retired_id
    }

    pub(super) fn record_submission(&mut self, fence_id: u64) {
        self.last_submitted_id = fence_id;
    }

    /// Raises the retirement watermark to `fence_id` if that is an
    /// advance. Never lowers it.
    pub(super) fn retire(&mut self, fence_id: u64) {
        if fence_id > self.last_retired_id {
            self.last_retired_id = fence_id;
        }
    }

    /// Marks everything submitted so far as retired (queue or device
    /// idle).
    pub(super) fn retire_all(&mut self) {
        self.last_retired_id = self.last_submitted_id;
    }
}

/// Fence tracker entry: the (queue, id) pair assigned at submission.
#[derive(Debug, Clone, Copy)]
pub struct FenceInfo {
    pub queue: vk::Queue,
    pub fence_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retirement_is_monotonic() {
        let mut queue = QueueInfo::new();
        queue.record_submission(5);
        queue.retire(3);
        assert_eq!(queue.last_retired_id(), 3);

        // A stale fence observation must not move the watermark back.
        queue.retire(2);
        assert_eq!(queue.last_retired_id(), 3);

        queue.retire_all();
        assert_eq!(queue.last_retired_id(), 5);

        // Idle twice is idempotent.
        queue.retire_all();
        assert_eq!(queue.last_retired_id(), 5);
        assert_eq!(queue.last_submitted_id(), 5);
    }
}
