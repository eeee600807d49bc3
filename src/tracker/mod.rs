//! Shadow bookkeeping of driver visible resources.
//!
//! The tracker answers, at any moment, which allocations each command
//! buffer depends on, whether each allocation is still referenced, and
//! whether each in-flight submission has retired.
//!
//! Objects attach to at most one memory allocation through a binding
//! edge. Command buffers accumulate references to the allocations their
//! recorded commands touch. Both relations are stored symmetrically: the
//! memory record keeps a set of bound objects and a set of referencing
//! command buffers, and the single reference count always equals the
//! combined size of the two sets.
//!
//! Retirement is driven by fence ids. Every submission draws the next id
//! from a process wide monotonic counter, even when no fence is passed.
//! A queue remembers the last submitted and last retired id; a command
//! buffer is in flight exactly while its fence id is above its queue's
//! retirement watermark. The watermark advances when a fence is observed
//! signalled or when a queue or the whole device goes idle.
//!
//! Violations never abort: the tracker reports, repairs its own state as
//! far as possible and carries on.

pub mod command_buffer;
pub mod handles;
pub mod memory;
pub mod object;
pub mod queue;
pub mod swapchain;

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use crate::diagnostics::{DiagnosticCode, Reporter, Severity};

use command_buffer::CommandBufferInfo;
use handles::ObjectHandle;
use memory::{AllocationDescriptor, MemoryInfo};
use object::{ObjectInfo, ObjectKind};
use queue::{FenceInfo, QueueInfo};
use swapchain::{SwapchainImage, SwapchainInfo};

/// All shadow state of the layer. Lives behind the interposer's single
/// mutex; every method completes its bookkeeping without blocking.
pub struct TrackerState {
    reporter: Arc<Reporter>,
    memories: HashMap<vk::DeviceMemory, MemoryInfo>,
    objects: HashMap<ObjectHandle, ObjectInfo>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferInfo>,
    queues: HashMap<vk::Queue, QueueInfo>,
    fences: HashMap<vk::Fence, FenceInfo>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainInfo>,
    next_fence_id: u64,
}

impl TrackerState {
    pub fn new(reporter: Arc<Reporter>) -> Self {
        Self {
            reporter,
            memories: HashMap::new(),
            objects: HashMap::new(),
            command_buffers: HashMap::new(),
            queues: HashMap::new(),
            fences: HashMap::new(),
            swapchains: HashMap::new(),
            next_fence_id: 1,
        }
    }

    pub fn get_reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn memory(&self, mem: vk::DeviceMemory) -> Option<&MemoryInfo> {
        self.memories.get(&mem)
    }

    pub fn object(&self, object: ObjectHandle) -> Option<&ObjectInfo> {
        self.objects.get(&object)
    }

    pub fn command_buffer(&self, cb: vk::CommandBuffer) -> Option<&CommandBufferInfo> {
        self.command_buffers.get(&cb)
    }

    pub fn queue(&self, queue: vk::Queue) -> Option<&QueueInfo> {
        self.queues.get(&queue)
    }

    pub fn fence(&self, fence: vk::Fence) -> Option<&FenceInfo> {
        self.fences.get(&fence)
    }

    pub fn memory_count(&self) -> usize {
        self.memories.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.len()
    }

    // Registration. Creation events are recorded after the driver call
    // succeeded, so these never fail.

    /// Queues persist for the lifetime of the device. Re-adding a queue
    /// the driver handed out before leaves its watermarks untouched.
    pub fn add_queue(&mut self, queue: vk::Queue) {
        self.queues.entry(queue).or_insert_with(QueueInfo::new);
    }

    /// `allocation` is `None` for swapchain owned memory.
    pub fn add_memory(&mut self, mem: vk::DeviceMemory, allocation: Option<AllocationDescriptor>) {
        self.memories.insert(mem, MemoryInfo::new(mem, allocation));
    }

    pub fn add_object(&mut self, object: ObjectHandle, kind: ObjectKind) {
        self.objects.insert(object, ObjectInfo::new(object, kind));
    }

    pub fn add_command_buffer(&mut self, cb: vk::CommandBuffer) {
        self.command_buffers.insert(cb, CommandBufferInfo::new(cb));
    }

    pub fn add_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        self.swapchains.entry(swapchain).or_insert_with(SwapchainInfo::new);
    }

    // Binding operations.

    /// Attaches `object` to `mem`. An existing edge is a violation and is
    /// left in place.
    pub fn bind_memory(&mut self, object: ObjectHandle, mem: vk::DeviceMemory) -> bool {
        if mem == vk::DeviceMemory::null() {
            self.reporter.report(
                Severity::Warning,
                DiagnosticCode::None,
                object.as_raw(),
                format!("Attempting to bind object {:#x} to null memory", object.as_raw()),
            );
            return true;
        }

        if !self.memories.contains_key(&mem) {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::InvalidMemObj,
                mem.as_raw(),
                format!(
                    "While trying to bind object {:#x}, no record for memory {:#x}",
                    object.as_raw(),
                    mem.as_raw()
                ),
            );
            return false;
        }

        let Some(object_info) = self.objects.get_mut(&object) else {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::InvalidObject,
                object.as_raw(),
                format!(
                    "Attempting to update binding of object {:#x} that is not in the object table",
                    object.as_raw()
                ),
            );
            return false;
        };

        if let Some(previous) = object_info.binding() {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::RebindObject,
                mem.as_raw(),
                format!(
                    "Attempting to bind memory {:#x} to object {:#x} which is already bound to memory {:#x}",
                    mem.as_raw(),
                    object.as_raw(),
                    previous.as_raw()
                ),
            );
            return false;
        }

        object_info.set_binding(Some(mem));
        if let Some(mem_info) = self.memories.get_mut(&mem) {
            mem_info.bind_object(object);
        }
        true
    }

    /// Sparse variant: a null memory clears the binding and an existing
    /// edge is replaced rather than rejected.
    pub fn bind_sparse_memory(&mut self, object: ObjectHandle, mem: vk::DeviceMemory) -> bool {
        if mem == vk::DeviceMemory::null() {
            self.clear_binding(object);
            return true;
        }

        if !self.objects.contains_key(&object) {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::InvalidObject,
                object.as_raw(),
                format!(
                    "Attempting to update binding of object {:#x} that is not in the object table",
                    object.as_raw()
                ),
            );
            return false;
        }
        if !self.memories.contains_key(&mem) {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::InvalidMemObj,
                mem.as_raw(),
                format!(
                    "While trying to bind object {:#x}, no record for memory {:#x}",
                    object.as_raw(),
                    mem.as_raw()
                ),
            );
            return false;
        }

        let previous = self.objects.get(&object).and_then(|info| info.binding());
        if let Some(previous) = previous {
            self.clear_binding(object);
            self.reporter.report(
                Severity::Info,
                DiagnosticCode::None,
                object.as_raw(),
                format!(
                    "Updating memory binding for object {:#x} from memory {:#x} to {:#x}",
                    object.as_raw(),
                    previous.as_raw(),
                    mem.as_raw()
                ),
            );
        }

        if let Some(mem_info) = self.memories.get_mut(&mem) {
            mem_info.bind_object(object);
        }
        if let Some(object_info) = self.objects.get_mut(&object) {
            object_info.set_binding(Some(mem));
        }
        true
    }

    /// Removes the object's binding edge, keeping both sides of the
    /// relation in sync.
    pub fn clear_binding(&mut self, object: ObjectHandle) -> bool {
        let Some(object_info) = self.objects.get_mut(&object) else {
            return false;
        };

        let Some(mem) = object_info.binding() else {
            self.reporter.report(
                Severity::Warning,
                DiagnosticCode::MemObjClearEmptyBindings,
                object.as_raw(),
                format!(
                    "Attempting to clear memory binding on object {:#x} but it has no binding",
                    object.as_raw()
                ),
            );
            return false;
        };

        object_info.set_binding(None);
        if let Some(mem_info) = self.memories.get_mut(&mem) {
            if mem_info.unbind_object(object) {
                return true;
            }
        }

        // The edge claimed a binding the memory side does not
        // know about.
        self.reporter.report(
            Severity::Error,
            DiagnosticCode::InternalError,
            object.as_raw(),
            format!(
                "While clearing the binding of object {:#x}, object not found in the holder set of memory {:#x}",
                object.as_raw(),
                mem.as_raw()
            ),
        );
        false
    }

    /// Resolves the memory an object is bound to, reporting at the
    /// lookup site when the object is unknown or unbound.
    pub fn memory_binding(&self, object: ObjectHandle) -> Option<vk::DeviceMemory> {
        match self.objects.get(&object) {
            None => {
                self.reporter.report(
                    Severity::Error,
                    DiagnosticCode::InvalidObject,
                    object.as_raw(),
                    format!(
                        "Trying to get memory binding for object {:#x} but no such object in the object table",
                        object.as_raw()
                    ),
                );
                self.log_objects();
                None
            }
            Some(object_info) => match object_info.binding() {
                Some(mem) => Some(mem),
                None => {
                    self.reporter.report(
                        Severity::Error,
                        DiagnosticCode::MissingMemBindings,
                        object.as_raw(),
                        format!(
                            "Trying to get memory binding for object {:#x} but object has no memory binding",
                            object.as_raw()
                        ),
                    );
                    self.log_objects();
                    None
                }
            },
        }
    }

    // Command buffer reference tracking.

    /// Records that `cb` depends on `mem`. Both sides are deduplicated;
    /// the reference count moves only when the edge is new.
    pub fn add_reference(&mut self, cb: vk::CommandBuffer, mem: vk::DeviceMemory) -> bool {
        if !self.memories.contains_key(&mem) {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::InvalidMemObj,
                cb.as_raw(),
                format!(
                    "Trying to reference memory {:#x} from command buffer {:#x} but no record for that memory. Was it correctly allocated? Did it already get freed?",
                    mem.as_raw(),
                    cb.as_raw()
                ),
            );
            return false;
        }

        let Some(cb_info) = self.command_buffers.get_mut(&cb) else {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::InvalidCb,
                cb.as_raw(),
                format!(
                    "Trying to reference memory {:#x} from command buffer {:#x} but no record for that command buffer. Was it incorrectly destroyed?",
                    mem.as_raw(),
                    cb.as_raw()
                ),
            );
            return false;
        };

        cb_info.add_reference(mem);
        if let Some(mem_info) = self.memories.get_mut(&mem) {
            mem_info.add_command_buffer(cb);
        }
        true
    }

    /// Drops every reference held by `cb`, decrementing each referenced
    /// allocation's count. Runs on reset, on begin and when a free
    /// garbage-collects retired buffers.
    pub fn clear_references(&mut self, cb: vk::CommandBuffer) -> bool {
        let Some(cb_info) = self.command_buffers.get_mut(&cb) else {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::InvalidCb,
                cb.as_raw(),
                format!("Unable to find command buffer {:#x} to clear references", cb.as_raw()),
            );
            return false;
        };

        for mem in cb_info.take_references() {
            // A stale reference to already deleted memory is tolerated
            // here; the free path reported it when it happened.
            if let Some(mem_info) = self.memories.get_mut(&mem) {
                mem_info.remove_command_buffer(cb);
            }
        }
        true
    }

    /// Removes the command buffer record along with its references.
    pub fn remove_command_buffer(&mut self, cb: vk::CommandBuffer) -> bool {
        let result = self.clear_references(cb);
        if result {
            self.command_buffers.remove(&cb);
        }
        result
    }

    // Submission and retirement.

    /// Assigns the next fence id to a submission of `cbs` on `queue`.
    /// The id is drawn even when `fence` is null. Returns the id.
    pub fn record_submission(
        &mut self,
        queue: vk::Queue,
        cbs: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> u64 {
        let fence_id = self.next_fence_id;
        self.next_fence_id += 1;

        if fence != vk::Fence::null() {
            if let Some(descriptor) = self
                .objects
                .get(&ObjectHandle::from(fence))
                .and_then(|info| info.fence())
            {
                if descriptor.is_signalled() {
                    self.reporter.report(
                        Severity::Error,
                        DiagnosticCode::InvalidFenceState,
                        fence.as_raw(),
                        format!(
                            "Fence {:#x} submitted in SIGNALLED state. Fences must be reset before being submitted",
                            fence.as_raw()
                        ),
                    );
                }
            }
            self.fences.insert(fence, FenceInfo { queue, fence_id });
        }

        self.queues
            .entry(queue)
            .or_insert_with(QueueInfo::new)
            .record_submission(fence_id);

        let submitted_fence = (fence != vk::Fence::null()).then_some(fence);
        for &cb in cbs {
            match self.command_buffers.get_mut(&cb) {
                Some(cb_info) => cb_info.record_submission(fence_id, queue, submitted_fence),
                None => self.reporter.report(
                    Severity::Error,
                    DiagnosticCode::InvalidCb,
                    cb.as_raw(),
                    format!("Submitting unknown command buffer {:#x}", cb.as_raw()),
                ),
            }
        }

        fence_id
    }

    /// Records that `fence` is known signalled: raises its queue's
    /// retirement watermark and sets the signalled bit on its descriptor.
    pub fn mark_fence_signalled(&mut self, fence: vk::Fence) {
        if let Some(fence_info) = self.fences.get(&fence).copied() {
            if let Some(queue_info) = self.queues.get_mut(&fence_info.queue) {
                queue_info.retire(fence_info.fence_id);
            }
        }

        if let Some(descriptor) = self
            .objects
            .get_mut(&ObjectHandle::from(fence))
            .and_then(|info| info.fence_mut())
        {
            descriptor.set_signalled(true);
        }
    }

    /// Signalled state from the fence's descriptor, `None` if the fence
    /// object is unknown.
    pub fn fence_signalled_state(&self, fence: vk::Fence) -> Option<bool> {
        self.objects
            .get(&ObjectHandle::from(fence))
            .and_then(|info| info.fence())
            .map(|descriptor| descriptor.is_signalled())
    }

    /// Clears the signalled bit after a successful fence reset.
    pub fn clear_fence_signalled(&mut self, fence: vk::Fence) {
        if let Some(descriptor) = self
            .objects
            .get_mut(&ObjectHandle::from(fence))
            .and_then(|info| info.fence_mut())
        {
            descriptor.set_signalled(false);
        }
    }

    /// Queue idle: everything submitted on `queue` has retired.
    pub fn retire_queue(&mut self, queue: vk::Queue) {
        self.queues
            .entry(queue)
            .or_insert_with(QueueInfo::new)
            .retire_all();
    }

    /// Device idle: everything submitted anywhere has retired.
    pub fn retire_all_queues(&mut self) {
        for queue_info in self.queues.values_mut() {
            queue_info.retire_all();
        }
    }

    /// True when the command buffer's last submission has retired on its
    /// queue, or when it was never submitted.
    pub fn is_retired(&self, cb: vk::CommandBuffer) -> bool {
        let Some(cb_info) = self.command_buffers.get(&cb) else {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::InvalidCb,
                cb.as_raw(),
                format!(
                    "Unable to find command buffer {:#x} to check for completion",
                    cb.as_raw()
                ),
            );
            return false;
        };

        let Some(queue) = cb_info.last_queue() else {
            return true;
        };

        let retired_id = self
            .queues
            .get(&queue)
            .map(|queue_info| queue_info.last_retired_id())
            .unwrap_or(0);

        if cb_info.fence_id() > retired_id {
            self.reporter.report(
                Severity::Info,
                DiagnosticCode::None,
                cb.as_raw(),
                format!(
                    "Fence id {} for command buffer {:#x} has not been observed complete",
                    cb_info.fence_id(),
                    cb.as_raw()
                ),
            );
            false
        } else {
            true
        }
    }

    pub fn remove_fence(&mut self, fence: vk::Fence) -> bool {
        self.fences.remove(&fence).is_some()
    }

    // Free and destroy.

    /// Frees an allocation. `internal` marks layer initiated frees of
    /// swapchain owned memory, which the application must not free
    /// itself.
    ///
    /// References held by command buffers whose submissions have retired
    /// are garbage-collected first. If references remain after that the
    /// holders are reported and forcibly dropped so later operations see
    /// consistent state; the record is removed either way.
    pub fn free_memory(&mut self, mem: vk::DeviceMemory, internal: bool) -> bool {
        let (swapchain_owned, referencing) = match self.memories.get(&mem) {
            None => {
                self.reporter.report(
                    Severity::Error,
                    DiagnosticCode::InvalidMemObj,
                    mem.as_raw(),
                    format!(
                        "Couldn't find record for memory {:#x}. Was it never allocated or previously freed?",
                        mem.as_raw()
                    ),
                );
                return false;
            }
            Some(mem_info) => (
                mem_info.is_swapchain_owned(),
                mem_info.command_buffers().iter().copied().collect::<Vec<_>>(),
            ),
        };

        if swapchain_owned && !internal {
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::InvalidMemObj,
                mem.as_raw(),
                format!(
                    "Attempting to free memory {:#x} backing a persistent swapchain image; it must not be freed explicitly",
                    mem.as_raw()
                ),
            );
            return false;
        }

        for cb in referencing {
            if self.is_retired(cb) {
                self.clear_references(cb);
            }
        }

        let mut result = true;
        let remaining = self
            .memories
            .get(&mem)
            .map(|mem_info| {
                (
                    mem_info.ref_count(),
                    mem_info.bound_objects().iter().copied().collect::<Vec<_>>(),
                    mem_info.command_buffers().iter().copied().collect::<Vec<_>>(),
                )
            })
            .unwrap_or((0, Vec::new(), Vec::new()));

        let (ref_count, bound_objects, command_buffers) = remaining;
        if ref_count != 0 {
            result = false;
            self.reporter.report(
                Severity::Error,
                DiagnosticCode::FreedMemRef,
                mem.as_raw(),
                format!(
                    "Freeing memory {:#x} while it still holds {} references",
                    mem.as_raw(),
                    ref_count
                ),
            );
            for object in &bound_objects {
                self.reporter.report(
                    Severity::Warning,
                    DiagnosticCode::FreedMemRef,
                    object.as_raw(),
                    format!(
                        "Object {:#x} still has a reference to memory {:#x}",
                        object.as_raw(),
                        mem.as_raw()
                    ),
                );
            }
            for cb in &command_buffers {
                self.reporter.report(
                    Severity::Warning,
                    DiagnosticCode::FreedMemRef,
                    cb.as_raw(),
                    format!(
                        "Command buffer {:#x} still has a reference to memory {:#x}",
                        cb.as_raw(),
                        mem.as_raw()
                    ),
                );
            }

            // Recovery: drop the dangling edges on both sides.
            for object in bound_objects {
                if let Some(object_info) = self.objects.get_mut(&object) {
                    object_info.set_binding(None);
                }
            }
            for cb in command_buffers {
                if let Some(cb_info) = self.command_buffers.get_mut(&cb) {
                    cb_info.remove_reference(mem);
                }
            }
            if let Some(mem_info) = self.memories.get_mut(&mem) {
                mem_info.clear_holders();
            }
        }

        self.memories.remove(&mem);
        result
    }

    /// Destroys any tracked object. Command buffers drop their reference
    /// sets, fences drop their tracker entry, bound objects drop their
    /// binding, and a binding to swapchain owned memory triggers an
    /// internal free of that memory.
    pub fn destroy_object(&mut self, object: ObjectHandle) {
        let cb: vk::CommandBuffer = object.as_typed();
        if self.command_buffers.contains_key(&cb) {
            self.remove_command_buffer(cb);
        }
        self.fences.remove(&object.as_typed::<vk::Fence>());

        let binding = self.objects.get(&object).and_then(|info| info.binding());
        if let Some(mem) = binding {
            let swapchain_owned = self
                .memories
                .get(&mem)
                .map(|mem_info| mem_info.is_swapchain_owned())
                .unwrap_or(false);
            self.clear_binding(object);
            if swapchain_owned {
                self.free_memory(mem, true);
            }
        }
        self.objects.remove(&object);
    }

    // Swapchain adoption.

    /// Records the persistent images the driver reported for a
    /// swapchain. The first query adopts the list: each image becomes an
    /// object bound to its driver owned allocation. Later queries only
    /// verify the list has not changed.
    pub fn adopt_swapchain_images(&mut self, swapchain: vk::SwapchainKHR, images: &[SwapchainImage]) {
        match self.swapchains.get(&swapchain) {
            Some(info) if info.has_images() => {
                if info.images_mismatch(images) {
                    self.reporter.report(
                        Severity::Warning,
                        DiagnosticCode::None,
                        swapchain.as_raw(),
                        format!(
                            "Swapchain {:#x} image query returned mismatching data",
                            swapchain.as_raw()
                        ),
                    );
                }
                return;
            }
            Some(_) => {}
            None => {
                self.swapchains.insert(swapchain, SwapchainInfo::new());
            }
        }

        for image in images {
            let handle = ObjectHandle::from(image.image);
            self.add_object(handle, ObjectKind::SwapchainImage);
            self.add_memory(image.memory, None);
            if !self.bind_memory(handle, image.memory) {
                self.reporter.report(
                    Severity::Error,
                    DiagnosticCode::MemoryBindingError,
                    handle.as_raw(),
                    format!(
                        "Unable to bind persistent image {:#x} to memory {:#x}",
                        handle.as_raw(),
                        image.memory.as_raw()
                    ),
                );
            }
        }
        if let Some(info) = self.swapchains.get_mut(&swapchain) {
            info.adopt_images(images);
        }
    }

    /// Destroys a swapchain: its persistent images are unbound, their
    /// memory freed internally and their object records erased.
    pub fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        let Some(info) = self.swapchains.remove(&swapchain) else {
            return;
        };
        for image in info.images() {
            let handle = ObjectHandle::from(image.image);
            self.clear_binding(handle);
            self.free_memory(image.memory, true);
            self.objects.remove(&handle);
        }
    }

    // Teardown.

    /// Device teardown: dump the tables, clear every command buffer's
    /// references, report application owned allocations that were never
    /// freed and drop all state. The fence id counter is process wide
    /// and keeps running.
    pub fn teardown(&mut self, device: vk::Device) {
        self.reporter.report(
            Severity::Info,
            DiagnosticCode::None,
            device.as_raw(),
            "Dumping tracker tables prior to device destruction".to_string(),
        );
        self.log_memory_table();
        self.log_command_buffers();
        self.log_objects();

        let cbs: Vec<_> = self.command_buffers.keys().copied().collect();
        for cb in cbs {
            self.clear_references(cb);
        }
        self.command_buffers.clear();

        for mem_info in self.memories.values() {
            if mem_info.allocation_size() != 0 {
                self.reporter.report(
                    Severity::Warning,
                    DiagnosticCode::MemoryLeak,
                    mem_info.get_handle().as_raw(),
                    format!(
                        "Memory {:#x} has not been freed. Free it before destroying the device",
                        mem_info.get_handle().as_raw()
                    ),
                );
            }
        }

        debug_assert!(self.validate().is_ok(), "tracker invariants broken at teardown");

        self.memories.clear();
        self.objects.clear();
        self.queues.clear();
        self.fences.clear();
        self.swapchains.clear();
    }

    // Informational dumps, gated on the configured report level.

    pub fn log_memory_table(&self) {
        if !self.reporter.enabled(Severity::Info) {
            return;
        }
        self.reporter.report(
            Severity::Info,
            DiagnosticCode::None,
            0,
            format!("Details of memory object table, {} entries", self.memories.len()),
        );
        for mem_info in self.memories.values() {
            self.reporter.report(
                Severity::Info,
                DiagnosticCode::None,
                mem_info.get_handle().as_raw(),
                format!(
                    "Memory {:#x}: ref count {}, size {}, {} bound objects, {} referencing command buffers",
                    mem_info.get_handle().as_raw(),
                    mem_info.ref_count(),
                    mem_info.allocation_size(),
                    mem_info.bound_objects().len(),
                    mem_info.command_buffers().len()
                ),
            );
        }
    }

    pub fn log_command_buffers(&self) {
        if !self.reporter.enabled(Severity::Info) {
            return;
        }
        self.reporter.report(
            Severity::Info,
            DiagnosticCode::None,
            0,
            format!(
                "Details of command buffer table, {} entries",
                self.command_buffers.len()
            ),
        );
        for cb_info in self.command_buffers.values() {
            self.reporter.report(
                Severity::Info,
                DiagnosticCode::None,
                cb_info.get_handle().as_raw(),
                format!(
                    "Command buffer {:#x}: fence id {}, {} memory references",
                    cb_info.get_handle().as_raw(),
                    cb_info.fence_id(),
                    cb_info.memory_refs().len()
                ),
            );
        }
    }

    pub fn log_objects(&self) {
        if !self.reporter.enabled(Severity::Info) {
            return;
        }
        self.reporter.report(
            Severity::Info,
            DiagnosticCode::None,
            0,
            format!("Details of object table, {} entries", self.objects.len()),
        );
        for object_info in self.objects.values() {
            let binding = object_info
                .binding()
                .map(|mem| format!("{:#x}", mem.as_raw()))
                .unwrap_or_else(|| "none".to_string());
            self.reporter.report(
                Severity::Info,
                DiagnosticCode::None,
                object_info.get_handle().as_raw(),
                format!(
                    "Object {:#x} ({}), memory binding {}",
                    object_info.get_handle().as_raw(),
                    object_info.get_kind().name(),
                    binding
                ),
            );
        }
    }

    /// Recomputes the structural invariants: reference count accuracy
    /// and edge symmetry in both relations, plus watermark ordering.
    /// Used by tests and by the teardown debug assertion.
    pub fn validate(&self) -> Result<(), String> {
        for mem_info in self.memories.values() {
            let mem = mem_info.get_handle();
            let holders = mem_info.bound_objects().len() + mem_info.command_buffers().len();
            if mem_info.ref_count() as usize != holders {
                return Err(format!(
                    "memory {:#x}: ref count {} != {} holders",
                    mem.as_raw(),
                    mem_info.ref_count(),
                    holders
                ));
            }
            for object in mem_info.bound_objects() {
                let bound = self
                    .objects
                    .get(object)
                    .and_then(|info| info.binding())
                    == Some(mem);
                if !bound {
                    return Err(format!(
                        "memory {:#x} lists object {:#x} but the object is not bound to it",
                        mem.as_raw(),
                        object.as_raw()
                    ));
                }
            }
            for cb in mem_info.command_buffers() {
                let referenced = self
                    .command_buffers
                    .get(cb)
                    .map(|info| info.memory_refs().contains(&mem))
                    .unwrap_or(false);
                if !referenced {
                    return Err(format!(
                        "memory {:#x} lists command buffer {:#x} but the buffer does not reference it",
                        mem.as_raw(),
                        cb.as_raw()
                    ));
                }
            }
        }

        for object_info in self.objects.values() {
            if let Some(mem) = object_info.binding() {
                let listed = self
                    .memories
                    .get(&mem)
                    .map(|info| info.bound_objects().contains(&object_info.get_handle()))
                    .unwrap_or(false);
                if !listed {
                    return Err(format!(
                        "object {:#x} is bound to memory {:#x} but the memory does not list it",
                        object_info.get_handle().as_raw(),
                        mem.as_raw()
                    ));
                }
            }
        }

        for cb_info in self.command_buffers.values() {
            for mem in cb_info.memory_refs() {
                let listed = self
                    .memories
                    .get(mem)
                    .map(|info| info.command_buffers().contains(&cb_info.get_handle()))
                    .unwrap_or(false);
                if !listed {
                    return Err(format!(
                        "command buffer {:#x} references memory {:#x} but the memory does not list it",
                        cb_info.get_handle().as_raw(),
                        mem.as_raw()
                    ));
                }
            }
        }

        for (queue, queue_info) in &self.queues {
            if queue_info.last_retired_id() > queue_info.last_submitted_id() {
                return Err(format!(
                    "queue {:#x}: retired id {} above submitted id {}",
                    queue.as_raw(),
                    queue_info.last_retired_id(),
                    queue_info.last_submitted_id()
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DebugAction, LayerConfig};
    use crate::diagnostics::Diagnostic;
    use crate::tracker::object::{BufferDescriptor, FenceDescriptor};
    use std::sync::Mutex;

    fn tracker() -> (TrackerState, Arc<Mutex<Vec<Diagnostic>>>) {
        let reporter = Arc::new(Reporter::new(
            &LayerConfig::default().with_debug_action(DebugAction::CALLBACK),
        ));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        reporter.register_callback(move |diagnostic: &Diagnostic| {
            sink.lock().unwrap().push(diagnostic.clone());
        });
        (TrackerState::new(reporter), captured)
    }

    fn codes(captured: &Arc<Mutex<Vec<Diagnostic>>>) -> Vec<DiagnosticCode> {
        captured.lock().unwrap().iter().map(|d| d.code).collect()
    }

    fn mem(raw: u64) -> vk::DeviceMemory {
        vk::DeviceMemory::from_raw(raw)
    }

    fn buffer(raw: u64) -> ObjectHandle {
        ObjectHandle::from(vk::Buffer::from_raw(raw))
    }

    fn cb(raw: u64) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(raw)
    }

    fn queue(raw: u64) -> vk::Queue {
        vk::Queue::from_raw(raw)
    }

    fn fence(raw: u64) -> vk::Fence {
        vk::Fence::from_raw(raw)
    }

    fn buffer_kind() -> ObjectKind {
        ObjectKind::Buffer(BufferDescriptor::new(256, vk::BufferUsageFlags::TRANSFER_SRC))
    }

    fn add_buffer_with_memory(state: &mut TrackerState, object_raw: u64, mem_raw: u64) {
        state.add_memory(mem(mem_raw), Some(AllocationDescriptor::new(1024, 0)));
        state.add_object(buffer(object_raw), buffer_kind());
        assert!(state.bind_memory(buffer(object_raw), mem(mem_raw)));
    }

    #[test]
    fn bind_and_clear_binding() {
        let (mut state, _captured) = tracker();
        add_buffer_with_memory(&mut state, 1, 10);

        assert_eq!(state.object(buffer(1)).unwrap().binding(), Some(mem(10)));
        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 1);
        state.validate().unwrap();

        assert!(state.clear_binding(buffer(1)));
        assert_eq!(state.object(buffer(1)).unwrap().binding(), None);
        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 0);
        state.validate().unwrap();
    }

    #[test]
    fn bind_to_null_memory_warns_and_succeeds() {
        let (mut state, captured) = tracker();
        state.add_object(buffer(1), buffer_kind());

        assert!(state.bind_memory(buffer(1), vk::DeviceMemory::null()));
        assert_eq!(state.object(buffer(1)).unwrap().binding(), None);

        let diagnostics = captured.lock().unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn bind_unknown_object_fails() {
        let (mut state, captured) = tracker();
        state.add_memory(mem(10), Some(AllocationDescriptor::new(64, 0)));

        assert!(!state.bind_memory(buffer(1), mem(10)));
        assert!(codes(&captured).contains(&DiagnosticCode::InvalidObject));
        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 0);
    }

    #[test]
    fn bind_unknown_memory_fails() {
        let (mut state, captured) = tracker();
        state.add_object(buffer(1), buffer_kind());

        assert!(!state.bind_memory(buffer(1), mem(10)));
        assert!(codes(&captured).contains(&DiagnosticCode::InvalidMemObj));
        assert_eq!(state.object(buffer(1)).unwrap().binding(), None);
    }

    #[test]
    fn rebind_is_rejected_and_keeps_first_edge() {
        let (mut state, captured) = tracker();
        state.add_memory(mem(10), Some(AllocationDescriptor::new(64, 0)));
        state.add_memory(mem(11), Some(AllocationDescriptor::new(64, 0)));
        state.add_object(buffer(1), buffer_kind());

        assert!(state.bind_memory(buffer(1), mem(10)));
        assert!(!state.bind_memory(buffer(1), mem(11)));

        assert!(codes(&captured).contains(&DiagnosticCode::RebindObject));
        assert_eq!(state.object(buffer(1)).unwrap().binding(), Some(mem(10)));
        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 1);
        assert_eq!(state.memory(mem(11)).unwrap().ref_count(), 0);
        state.validate().unwrap();
    }

    #[test]
    fn sparse_bind_may_rebind() {
        let (mut state, captured) = tracker();
        state.add_memory(mem(10), Some(AllocationDescriptor::new(64, 0)));
        state.add_memory(mem(11), Some(AllocationDescriptor::new(64, 0)));
        state.add_object(buffer(1), buffer_kind());

        assert!(state.bind_sparse_memory(buffer(1), mem(10)));
        assert!(state.bind_sparse_memory(buffer(1), mem(11)));

        assert_eq!(state.object(buffer(1)).unwrap().binding(), Some(mem(11)));
        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 0);
        assert_eq!(state.memory(mem(11)).unwrap().ref_count(), 1);
        // The transition is reported at info level.
        assert!(captured
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.severity == Severity::Info && d.code == DiagnosticCode::None));
        state.validate().unwrap();

        // Null memory clears the binding.
        assert!(state.bind_sparse_memory(buffer(1), vk::DeviceMemory::null()));
        assert_eq!(state.object(buffer(1)).unwrap().binding(), None);
        assert_eq!(state.memory(mem(11)).unwrap().ref_count(), 0);
    }

    #[test]
    fn clear_empty_binding_warns() {
        let (mut state, captured) = tracker();
        state.add_object(buffer(1), buffer_kind());

        assert!(!state.clear_binding(buffer(1)));
        assert!(codes(&captured).contains(&DiagnosticCode::MemObjClearEmptyBindings));
    }

    #[test]
    fn references_are_symmetric_and_deduplicated() {
        let (mut state, _captured) = tracker();
        state.add_memory(mem(10), Some(AllocationDescriptor::new(64, 0)));
        state.add_command_buffer(cb(1));

        assert!(state.add_reference(cb(1), mem(10)));
        assert!(state.add_reference(cb(1), mem(10)));

        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 1);
        assert_eq!(state.command_buffer(cb(1)).unwrap().memory_refs().len(), 1);
        state.validate().unwrap();

        assert!(state.clear_references(cb(1)));
        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 0);
        assert!(state.command_buffer(cb(1)).unwrap().memory_refs().is_empty());
        state.validate().unwrap();
    }

    #[test]
    fn reference_to_unknown_memory_or_buffer_fails() {
        let (mut state, captured) = tracker();
        state.add_command_buffer(cb(1));

        assert!(!state.add_reference(cb(1), mem(10)));
        assert!(codes(&captured).contains(&DiagnosticCode::InvalidMemObj));

        state.add_memory(mem(10), Some(AllocationDescriptor::new(64, 0)));
        assert!(!state.add_reference(cb(2), mem(10)));
        assert!(codes(&captured).contains(&DiagnosticCode::InvalidCb));
        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 0);
    }

    #[test]
    fn memory_binding_reports_unknown_and_unbound() {
        let (state, captured) = tracker();
        assert_eq!(state.memory_binding(buffer(1)), None);
        assert!(codes(&captured).contains(&DiagnosticCode::InvalidObject));

        let (mut state, captured) = tracker();
        state.add_object(buffer(1), buffer_kind());
        assert_eq!(state.memory_binding(buffer(1)), None);
        assert!(codes(&captured).contains(&DiagnosticCode::MissingMemBindings));
        state.add_memory(mem(10), Some(AllocationDescriptor::new(64, 0)));
        assert!(state.bind_memory(buffer(1), mem(10)));
        assert_eq!(state.memory_binding(buffer(1)), Some(mem(10)));
    }

    #[test]
    fn fence_ids_are_strictly_increasing() {
        let (mut state, _captured) = tracker();
        state.add_queue(queue(1));
        state.add_queue(queue(2));
        state.add_command_buffer(cb(1));

        let first = state.record_submission(queue(1), &[cb(1)], vk::Fence::null());
        let second = state.record_submission(queue(2), &[], vk::Fence::null());
        let third = state.record_submission(queue(1), &[], vk::Fence::null());

        assert!(first < second && second < third);
        assert_eq!(state.queue(queue(1)).unwrap().last_submitted_id(), third);
        assert_eq!(state.queue(queue(2)).unwrap().last_submitted_id(), second);
        assert_eq!(state.command_buffer(cb(1)).unwrap().fence_id(), first);
        assert_eq!(state.command_buffer(cb(1)).unwrap().last_queue(), Some(queue(1)));
        state.validate().unwrap();
    }

    #[test]
    fn submitting_signalled_fence_reports_but_proceeds() {
        let (mut state, captured) = tracker();
        state.add_queue(queue(1));
        state.add_object(
            ObjectHandle::from(fence(5)),
            ObjectKind::Fence(FenceDescriptor::new(vk::FenceCreateFlags::SIGNALED)),
        );

        let id = state.record_submission(queue(1), &[], fence(5));

        assert!(codes(&captured).contains(&DiagnosticCode::InvalidFenceState));
        assert_eq!(state.fence(fence(5)).unwrap().fence_id, id);
        assert_eq!(state.queue(queue(1)).unwrap().last_submitted_id(), id);
    }

    #[test]
    fn fence_signal_advances_watermark_and_descriptor() {
        let (mut state, _captured) = tracker();
        state.add_queue(queue(1));
        state.add_object(
            ObjectHandle::from(fence(5)),
            ObjectKind::Fence(FenceDescriptor::new(vk::FenceCreateFlags::empty())),
        );

        let id = state.record_submission(queue(1), &[], fence(5));
        assert_eq!(state.queue(queue(1)).unwrap().last_retired_id(), 0);
        assert_eq!(state.fence_signalled_state(fence(5)), Some(false));

        state.mark_fence_signalled(fence(5));
        assert_eq!(state.queue(queue(1)).unwrap().last_retired_id(), id);
        assert_eq!(state.fence_signalled_state(fence(5)), Some(true));

        // A later submission with an earlier fence observation must not
        // move the watermark backwards.
        let newer = state.record_submission(queue(1), &[], fence(6));
        state.retire_queue(queue(1));
        state.mark_fence_signalled(fence(5));
        assert_eq!(state.queue(queue(1)).unwrap().last_retired_id(), newer);
    }

    #[test]
    fn queue_and_device_idle_retire_everything() {
        let (mut state, _captured) = tracker();
        state.add_queue(queue(1));
        state.add_queue(queue(2));
        let first = state.record_submission(queue(1), &[], vk::Fence::null());
        let second = state.record_submission(queue(2), &[], vk::Fence::null());

        state.retire_queue(queue(1));
        assert_eq!(state.queue(queue(1)).unwrap().last_retired_id(), first);
        assert_eq!(state.queue(queue(2)).unwrap().last_retired_id(), 0);

        // Idempotent.
        state.retire_queue(queue(1));
        assert_eq!(state.queue(queue(1)).unwrap().last_retired_id(), first);

        state.retire_all_queues();
        assert_eq!(state.queue(queue(2)).unwrap().last_retired_id(), second);
        state.retire_all_queues();
        assert_eq!(state.queue(queue(2)).unwrap().last_retired_id(), second);
        state.validate().unwrap();
    }

    #[test]
    fn command_buffer_retirement() {
        let (mut state, _captured) = tracker();
        state.add_queue(queue(1));
        state.add_command_buffer(cb(1));

        // Never submitted: retired by definition.
        assert!(state.is_retired(cb(1)));

        state.record_submission(queue(1), &[cb(1)], vk::Fence::null());
        assert!(!state.is_retired(cb(1)));

        state.retire_queue(queue(1));
        assert!(state.is_retired(cb(1)));
    }

    #[test]
    fn free_unknown_memory_reports_invalid_mem_obj() {
        let (mut state, captured) = tracker();
        assert!(!state.free_memory(mem(10), false));
        assert_eq!(codes(&captured), vec![DiagnosticCode::InvalidMemObj]);
    }

    #[test]
    fn double_free_reports_invalid_mem_obj() {
        let (mut state, captured) = tracker();
        state.add_memory(mem(10), Some(AllocationDescriptor::new(1024, 0)));
        assert!(state.free_memory(mem(10), false));
        assert!(!state.free_memory(mem(10), false));
        assert_eq!(codes(&captured), vec![DiagnosticCode::InvalidMemObj]);
    }

    #[test]
    fn free_with_live_binding_reports_holders_and_removes_record() {
        let (mut state, captured) = tracker();
        add_buffer_with_memory(&mut state, 1, 10);

        assert!(!state.free_memory(mem(10), false));

        let diagnostics = captured.lock().unwrap();
        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::FreedMemRef && d.object == mem(10).as_raw()));
        // The holder is named.
        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::FreedMemRef && d.object == buffer(1).as_raw()));
        drop(diagnostics);

        assert!(state.memory(mem(10)).is_none());
        // Recovery nulled the object's edge so the state stays coherent.
        assert_eq!(state.object(buffer(1)).unwrap().binding(), None);
        state.validate().unwrap();
    }

    #[test]
    fn free_garbage_collects_retired_references() {
        let (mut state, _captured) = tracker();
        state.add_memory(mem(10), Some(AllocationDescriptor::new(1024, 0)));
        state.add_command_buffer(cb(1));
        state.add_queue(queue(1));

        assert!(state.add_reference(cb(1), mem(10)));
        state.record_submission(queue(1), &[cb(1)], vk::Fence::null());
        state.retire_queue(queue(1));

        // The reference belongs to a retired submission, so the free is
        // clean and clears it.
        assert!(state.free_memory(mem(10), false));
        assert!(state.command_buffer(cb(1)).unwrap().memory_refs().is_empty());
        state.validate().unwrap();
    }

    #[test]
    fn free_in_flight_reference_is_a_violation() {
        let (mut state, captured) = tracker();
        state.add_memory(mem(10), Some(AllocationDescriptor::new(1024, 0)));
        state.add_command_buffer(cb(1));
        state.add_queue(queue(1));

        assert!(state.add_reference(cb(1), mem(10)));
        state.record_submission(queue(1), &[cb(1)], vk::Fence::null());

        assert!(!state.free_memory(mem(10), false));
        assert!(codes(&captured).contains(&DiagnosticCode::FreedMemRef));
        assert!(state.memory(mem(10)).is_none());
        state.validate().unwrap();
    }

    #[test]
    fn swapchain_owned_memory_is_protected_from_the_application() {
        let (mut state, captured) = tracker();
        state.add_memory(mem(10), None);

        assert!(!state.free_memory(mem(10), false));
        assert!(codes(&captured).contains(&DiagnosticCode::InvalidMemObj));
        assert!(state.memory(mem(10)).is_some());

        assert!(state.free_memory(mem(10), true));
        assert!(state.memory(mem(10)).is_none());
    }

    #[test]
    fn destroy_object_clears_binding() {
        let (mut state, _captured) = tracker();
        add_buffer_with_memory(&mut state, 1, 10);

        state.destroy_object(buffer(1));
        assert!(state.object(buffer(1)).is_none());
        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 0);
        state.validate().unwrap();
    }

    #[test]
    fn destroy_command_buffer_drops_references() {
        let (mut state, _captured) = tracker();
        state.add_memory(mem(10), Some(AllocationDescriptor::new(64, 0)));
        state.add_command_buffer(cb(1));
        assert!(state.add_reference(cb(1), mem(10)));

        state.destroy_object(ObjectHandle::from(cb(1)));
        assert!(state.command_buffer(cb(1)).is_none());
        assert_eq!(state.memory(mem(10)).unwrap().ref_count(), 0);
        state.validate().unwrap();
    }

    #[test]
    fn destroy_fence_drops_tracker_entry() {
        let (mut state, _captured) = tracker();
        state.add_queue(queue(1));
        state.add_object(
            ObjectHandle::from(fence(5)),
            ObjectKind::Fence(FenceDescriptor::new(vk::FenceCreateFlags::empty())),
        );
        state.record_submission(queue(1), &[], fence(5));
        assert!(state.fence(fence(5)).is_some());

        state.destroy_object(ObjectHandle::from(fence(5)));
        assert!(state.fence(fence(5)).is_none());
        assert!(state.object(ObjectHandle::from(fence(5))).is_none());
    }

    #[test]
    fn destroying_object_bound_to_swapchain_memory_frees_it_internally() {
        let (mut state, _captured) = tracker();
        let image = ObjectHandle::from(vk::Image::from_raw(7));
        state.add_object(image, ObjectKind::SwapchainImage);
        state.add_memory(mem(10), None);
        assert!(state.bind_memory(image, mem(10)));

        state.destroy_object(image);
        assert!(state.object(image).is_none());
        assert!(state.memory(mem(10)).is_none());
    }

    #[test]
    fn swapchain_adoption_and_destruction() {
        let (mut state, captured) = tracker();
        let swapchain = vk::SwapchainKHR::from_raw(100);
        state.add_swapchain(swapchain);

        let images = [
            SwapchainImage {
                image: vk::Image::from_raw(7),
                memory: mem(70),
            },
            SwapchainImage {
                image: vk::Image::from_raw(8),
                memory: mem(80),
            },
        ];
        state.adopt_swapchain_images(swapchain, &images);

        assert_eq!(state.memory(mem(70)).unwrap().ref_count(), 1);
        assert!(state.memory(mem(70)).unwrap().is_swapchain_owned());
        assert!(state.object(ObjectHandle::from(images[0].image)).is_some());
        state.validate().unwrap();

        // Identical re-query is quiet, a different list is not.
        state.adopt_swapchain_images(swapchain, &images);
        assert!(!captured
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.severity == Severity::Warning));
        let mismatching = [images[0]];
        state.adopt_swapchain_images(swapchain, &mismatching);
        assert!(captured
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.severity == Severity::Warning && d.object == swapchain.as_raw()));

        state.destroy_swapchain(swapchain);
        assert!(state.memory(mem(70)).is_none());
        assert!(state.memory(mem(80)).is_none());
        assert!(state.object(ObjectHandle::from(images[0].image)).is_none());
        state.validate().unwrap();
    }

    #[test]
    fn teardown_reports_leaks_and_clears_tables() {
        let (mut state, captured) = tracker();
        state.add_memory(mem(10), Some(AllocationDescriptor::new(1024, 0)));
        state.add_memory(mem(11), None); // swapchain owned, not a leak
        state.add_command_buffer(cb(1));
        state.add_queue(queue(1));

        state.teardown(vk::Device::from_raw(1));

        let leaks: Vec<_> = captured
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.code == DiagnosticCode::MemoryLeak)
            .map(|d| d.object)
            .collect();
        assert_eq!(leaks, vec![mem(10).as_raw()]);

        assert_eq!(state.memory_count(), 0);
        assert_eq!(state.object_count(), 0);
        assert_eq!(state.command_buffer_count(), 0);

        // The fence id counter is process wide and survives teardown.
        state.add_queue(queue(1));
        let id = state.record_submission(queue(1), &[], vk::Fence::null());
        assert!(id > 1);
    }
}
