//! The validation interposer.
//!
//! [`MemTracker`] sits between the application and the next element of
//! the chain. Every intercepted entry point does its bookkeeping under
//! the single tracker mutex and forwards to the downstream table outside
//! the critical section, so the lock is never held across a driver call
//! that may block. Result codes come back from the driver unchanged with
//! one exception: resetting an unsignalled fence is rejected before the
//! driver is ever called.
//!
//! The layer tracks a single device; attaching it creates the tracker
//! context and destroying the device tears it down.

use std::ffi::c_void;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;

use crate::config::LayerConfig;
use crate::diagnostics::{CallbackId, Diagnostic, DiagnosticCode, Reporter, Severity};
use crate::dispatch::NextDevice;
use crate::tracker::handles::ObjectHandle;
use crate::tracker::memory::AllocationDescriptor;
use crate::tracker::object::{
    BufferDescriptor, BufferViewDescriptor, DynamicStateKind, FenceDescriptor, ImageDescriptor,
    ImageViewDescriptor, ObjectKind, PipelineDescriptor, QueryPoolDescriptor,
};
use crate::tracker::swapchain::SwapchainImage;
use crate::tracker::TrackerState;

/// Extension advertised to the layer enumeration query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerExtension {
    pub name: &'static str,
    pub version: u32,
}

pub const LAYER_NAME: &str = "MemTracker";

pub const LAYER_EXTENSIONS: [LayerExtension; 2] = [
    LayerExtension {
        name: "MemTracker",
        version: 0x10,
    },
    LayerExtension {
        name: "Validation",
        version: 0x10,
    },
];

/// Entry points this layer intercepts. Anything else falls through the
/// chain unmodified.
const INTERCEPTED_ENTRY_POINTS: &[&str] = &[
    "vkCreateDevice",
    "vkDestroyDevice",
    "vkGetDeviceQueue",
    "vkQueueSubmit",
    "vkQueueWaitIdle",
    "vkDeviceWaitIdle",
    "vkAllocateMemory",
    "vkFreeMemory",
    "vkMapMemory",
    "vkUnmapMemory",
    "vkBindObjectMemory",
    "vkQueueBindSparseBufferMemory",
    "vkDestroyObject",
    "vkCreateFence",
    "vkResetFences",
    "vkGetFenceStatus",
    "vkWaitForFences",
    "vkCreateBuffer",
    "vkCreateBufferView",
    "vkCreateImage",
    "vkCreateImageView",
    "vkCreateEvent",
    "vkCreateQueryPool",
    "vkCreateSampler",
    "vkCreateGraphicsPipeline",
    "vkCreateComputePipeline",
    "vkCreateDynamicViewportState",
    "vkCreateDynamicRasterState",
    "vkCreateDynamicColorBlendState",
    "vkCreateDynamicDepthStencilState",
    "vkCreateCommandBuffer",
    "vkBeginCommandBuffer",
    "vkEndCommandBuffer",
    "vkResetCommandBuffer",
    "vkCmdBindPipeline",
    "vkCmdBindVertexBuffers",
    "vkCmdBindIndexBuffer",
    "vkCmdDrawIndirect",
    "vkCmdDrawIndexedIndirect",
    "vkCmdDispatchIndirect",
    "vkCmdCopyBuffer",
    "vkCmdCopyBufferToImage",
    "vkCmdCopyImageToBuffer",
    "vkCmdUpdateBuffer",
    "vkCmdFillBuffer",
    "vkCmdClearColorImage",
    "vkCmdClearDepthStencil",
    "vkCmdResolveImage",
    "vkCmdBeginQuery",
    "vkCmdEndQuery",
    "vkCmdResetQueryPool",
    "vkDbgRegisterMsgCallback",
    "vkDbgUnregisterMsgCallback",
    "vkCreateSwapChainWSI",
    "vkDestroySwapChainWSI",
    "vkGetSwapChainInfoWSI",
];

struct MemTrackerImpl {
    next: Arc<dyn NextDevice>,
    reporter: Arc<Reporter>,
    state: Mutex<TrackerState>,
    device: vk::Device,
}

/// Public layer api.
///
/// This is a smart pointer reference to an internal struct.
pub struct MemTracker(Arc<MemTrackerImpl>);

impl Clone for MemTracker {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl MemTracker {
    /// Attaches the layer: creates the device downstream and builds the
    /// tracker context around it. Configuration is consulted exactly
    /// once, here.
    pub fn create_device(next: Arc<dyn NextDevice>, config: LayerConfig) -> VkResult<Self> {
        let reporter = Arc::new(Reporter::new(&config));
        let device = next.create_device()?;
        Ok(Self(Arc::new(MemTrackerImpl {
            state: Mutex::new(TrackerState::new(reporter.clone())),
            reporter,
            next,
            device,
        })))
    }

    pub fn get_device(&self) -> vk::Device {
        self.0.device
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.0.state.lock().unwrap()
    }

    /// True if this layer or anything further down the chain handles the
    /// named entry point.
    pub fn handles_entry_point(&self, name: &str) -> bool {
        Self::intercepts(name) || self.0.next.handles_entry_point(name)
    }

    /// True if this layer itself intercepts the named entry point.
    pub fn intercepts(name: &str) -> bool {
        INTERCEPTED_ENTRY_POINTS.contains(&name)
    }

    // Diagnostic callback registration.

    pub fn register_callback<F>(&self, func: F) -> CallbackId
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        self.0.reporter.register_callback(func)
    }

    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        self.0.reporter.unregister_callback(id)
    }

    // Oracle queries. The tracker can answer these at any moment.

    /// The allocations this command buffer currently depends on.
    pub fn command_buffer_references(&self, cb: vk::CommandBuffer) -> Vec<vk::DeviceMemory> {
        self.state()
            .command_buffer(cb)
            .map(|info| info.memory_refs().iter().copied().collect())
            .unwrap_or_default()
    }

    /// The live reference count of an allocation, `None` if unknown.
    pub fn memory_reference_count(&self, mem: vk::DeviceMemory) -> Option<u32> {
        self.state().memory(mem).map(|info| info.ref_count())
    }

    /// Whether the command buffer's last submission has retired.
    pub fn is_command_buffer_retired(&self, cb: vk::CommandBuffer) -> bool {
        self.state().is_retired(cb)
    }

    /// Recomputes the tracker's structural invariants.
    pub fn validate(&self) -> Result<(), String> {
        self.state().validate()
    }

    // Device lifetime.

    pub fn destroy_device(&self) -> VkResult<()> {
        {
            let mut state = self.state();
            state.teardown(self.0.device);
        }
        self.0.next.destroy_device(self.0.device)
    }

    // Queues, submission, retirement.

    pub fn get_device_queue(&self, family_index: u32, queue_index: u32) -> VkResult<vk::Queue> {
        let queue = self.0.next.get_device_queue(family_index, queue_index)?;
        self.state().add_queue(queue);
        Ok(queue)
    }

    pub fn queue_submit(
        &self,
        queue: vk::Queue,
        cbs: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> VkResult<()> {
        {
            let mut state = self.state();
            state.record_submission(queue, cbs, fence);
            state.log_memory_table();
            state.log_command_buffers();
        }
        self.0.next.queue_submit(queue, cbs, fence)
    }

    pub fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        self.0.next.queue_wait_idle(queue)?;
        self.state().retire_queue(queue);
        Ok(())
    }

    pub fn device_wait_idle(&self) -> VkResult<()> {
        self.0.next.device_wait_idle()?;
        self.state().retire_all_queues();
        Ok(())
    }

    // Memory.

    pub fn allocate_memory(&self, allocation: &AllocationDescriptor) -> VkResult<vk::DeviceMemory> {
        let mem = self.0.next.allocate_memory(allocation)?;
        {
            let mut state = self.state();
            state.add_memory(mem, Some(*allocation));
            state.log_memory_table();
        }
        Ok(mem)
    }

    /// The application must unbind objects and let referencing command
    /// buffers retire before freeing. The free is forwarded either way;
    /// the tracker reports violations and repairs its own state.
    pub fn free_memory(&self, mem: vk::DeviceMemory) -> VkResult<()> {
        {
            let mut state = self.state();
            state.free_memory(mem, false);
            state.log_memory_table();
            state.log_objects();
            state.log_command_buffers();
        }
        self.0.next.free_memory(mem)
    }

    pub fn map_memory(
        &self,
        mem: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        {
            let state = self.state();
            match state.memory(mem) {
                None => {
                    self.0.reporter.report(
                        Severity::Error,
                        DiagnosticCode::InvalidMemObj,
                        mem.as_raw(),
                        format!("Mapping unknown memory {:#x}", mem.as_raw()),
                    );
                }
                Some(info) => {
                    let host_visible = info
                        .get_allocation()
                        .map(|allocation| {
                            allocation
                                .property_flags
                                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
                        })
                        .unwrap_or(false);
                    if !host_visible {
                        self.0.reporter.report(
                            Severity::Error,
                            DiagnosticCode::InvalidState,
                            mem.as_raw(),
                            format!(
                                "Mapping memory {:#x} without HOST_VISIBLE property set",
                                mem.as_raw()
                            ),
                        );
                    }
                }
            }
        }
        self.0.next.map_memory(mem, offset, size)
    }

    pub fn unmap_memory(&self, mem: vk::DeviceMemory) -> VkResult<()> {
        self.0.next.unmap_memory(mem)
    }

    // Binding.

    pub fn bind_object_memory(
        &self,
        object: ObjectHandle,
        mem: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let result = self.0.next.bind_object_memory(object, mem, offset);
        {
            let mut state = self.state();
            state.bind_memory(object, mem);
            state.log_objects();
            state.log_memory_table();
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    pub fn queue_bind_sparse_buffer_memory(
        &self,
        queue: vk::Queue,
        buffer: vk::Buffer,
        range_offset: vk::DeviceSize,
        range_size: vk::DeviceSize,
        mem: vk::DeviceMemory,
        memory_offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let result = self.0.next.queue_bind_sparse_buffer_memory(
            queue,
            buffer,
            range_offset,
            range_size,
            mem,
            memory_offset,
        );
        {
            let mut state = self.state();
            if !state.bind_sparse_memory(ObjectHandle::from(buffer), mem) {
                self.0.reporter.report(
                    Severity::Error,
                    DiagnosticCode::MemoryBindingError,
                    buffer.as_raw(),
                    format!(
                        "Unable to set binding of buffer {:#x} to memory {:#x}",
                        buffer.as_raw(),
                        mem.as_raw()
                    ),
                );
            }
            state.log_objects();
            state.log_memory_table();
        }
        result
    }

    // Fences.

    pub fn create_fence(&self, descriptor: &FenceDescriptor) -> VkResult<vk::Fence> {
        let fence = self.0.next.create_fence(descriptor)?;
        self.state()
            .add_object(ObjectHandle::from(fence), ObjectKind::Fence(*descriptor));
        Ok(fence)
    }

    /// Resetting requires the SIGNALLED state. An unsignalled fence in
    /// the list rejects the whole call with an invalid-value result and
    /// the driver is not called.
    pub fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        {
            let state = self.state();
            let mut valid = true;
            for &fence in fences {
                if state.fence_signalled_state(fence) == Some(false) {
                    self.0.reporter.report(
                        Severity::Error,
                        DiagnosticCode::InvalidFenceState,
                        fence.as_raw(),
                        format!("Fence {:#x} reset while in UNSIGNALLED state", fence.as_raw()),
                    );
                    valid = false;
                }
            }
            if !valid {
                return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
            }
        }

        self.0.next.reset_fences(fences)?;

        let mut state = self.state();
        for &fence in fences {
            state.clear_fence_signalled(fence);
        }
        Ok(())
    }

    pub fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        let signalled = self.0.next.get_fence_status(fence)?;
        if signalled {
            self.state().mark_fence_signalled(fence);
        }
        Ok(signalled)
    }

    /// On success the retirement watermark advances for each fence, but
    /// only when `wait_all` is set or a single fence was waited on; with
    /// `wait_all` false and several fences it is unknown which fence
    /// signalled, so nothing advances.
    pub fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout_ns: u64,
    ) -> VkResult<()> {
        {
            let state = self.state();
            for &fence in fences {
                if state.fence_signalled_state(fence) == Some(true) {
                    self.0.reporter.report(
                        Severity::Warning,
                        DiagnosticCode::InvalidFenceState,
                        fence.as_raw(),
                        format!(
                            "Waiting on fence {:#x} already in SIGNALLED state",
                            fence.as_raw()
                        ),
                    );
                }
            }
        }

        self.0.next.wait_for_fences(fences, wait_all, timeout_ns)?;

        if wait_all || fences.len() == 1 {
            let mut state = self.state();
            for &fence in fences {
                state.mark_fence_signalled(fence);
            }
        }
        Ok(())
    }

    // Object creation.

    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> VkResult<vk::Buffer> {
        let buffer = self.0.next.create_buffer(descriptor)?;
        self.state()
            .add_object(ObjectHandle::from(buffer), ObjectKind::Buffer(*descriptor));
        Ok(buffer)
    }

    pub fn create_buffer_view(&self, descriptor: &BufferViewDescriptor) -> VkResult<vk::BufferView> {
        let view = self.0.next.create_buffer_view(descriptor)?;
        self.state()
            .add_object(ObjectHandle::from(view), ObjectKind::BufferView(*descriptor));
        Ok(view)
    }

    pub fn create_image(&self, descriptor: &ImageDescriptor) -> VkResult<vk::Image> {
        let image = self.0.next.create_image(descriptor)?;
        self.state()
            .add_object(ObjectHandle::from(image), ObjectKind::Image(*descriptor));
        Ok(image)
    }

    pub fn create_image_view(&self, descriptor: &ImageViewDescriptor) -> VkResult<vk::ImageView> {
        let view = self.0.next.create_image_view(descriptor)?;
        self.state()
            .add_object(ObjectHandle::from(view), ObjectKind::ImageView(*descriptor));
        Ok(view)
    }

    pub fn create_event(&self) -> VkResult<vk::Event> {
        let event = self.0.next.create_event()?;
        self.state()
            .add_object(ObjectHandle::from(event), ObjectKind::Event);
        Ok(event)
    }

    pub fn create_query_pool(&self, descriptor: &QueryPoolDescriptor) -> VkResult<vk::QueryPool> {
        let pool = self.0.next.create_query_pool(descriptor)?;
        self.state()
            .add_object(ObjectHandle::from(pool), ObjectKind::QueryPool(*descriptor));
        Ok(pool)
    }

    pub fn create_sampler(&self) -> VkResult<vk::Sampler> {
        let sampler = self.0.next.create_sampler()?;
        self.state()
            .add_object(ObjectHandle::from(sampler), ObjectKind::Sampler);
        Ok(sampler)
    }

    pub fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> VkResult<vk::Pipeline> {
        let pipeline = self.0.next.create_pipeline(descriptor)?;
        self.state()
            .add_object(ObjectHandle::from(pipeline), ObjectKind::Pipeline(*descriptor));
        Ok(pipeline)
    }

    pub fn create_dynamic_state(&self, kind: DynamicStateKind) -> VkResult<ObjectHandle> {
        let state_object = self.0.next.create_dynamic_state(kind)?;
        self.state()
            .add_object(state_object, ObjectKind::DynamicState(kind));
        Ok(state_object)
    }

    pub fn destroy_object(&self, object: ObjectHandle) -> VkResult<()> {
        {
            let mut state = self.state();
            state.destroy_object(object);
        }
        self.0.next.destroy_object(object)
    }

    // Command buffer lifecycle.

    pub fn create_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        let cb = self.0.next.create_command_buffer()?;
        {
            let mut state = self.state();
            state.add_command_buffer(cb);
            state.log_command_buffers();
        }
        Ok(cb)
    }

    /// Begin implicitly resets, so the buffer must have retired. The
    /// references are cleared after forwarding on the assumption the
    /// underlying call proceeds.
    pub fn begin_command_buffer(&self, cb: vk::CommandBuffer) -> VkResult<()> {
        {
            let state = self.state();
            if !state.is_retired(cb) {
                self.0.reporter.report(
                    Severity::Error,
                    DiagnosticCode::ResetCbWhileInFlight,
                    cb.as_raw(),
                    format!(
                        "Calling begin on command buffer {:#x} before its submission has completed. Check its fence first",
                        cb.as_raw()
                    ),
                );
            }
        }
        let result = self.0.next.begin_command_buffer(cb);
        self.state().clear_references(cb);
        result
    }

    pub fn end_command_buffer(&self, cb: vk::CommandBuffer) -> VkResult<()> {
        self.0.next.end_command_buffer(cb)
    }

    pub fn reset_command_buffer(&self, cb: vk::CommandBuffer) -> VkResult<()> {
        {
            let mut state = self.state();
            if !state.is_retired(cb) {
                self.0.reporter.report(
                    Severity::Error,
                    DiagnosticCode::ResetCbWhileInFlight,
                    cb.as_raw(),
                    format!(
                        "Resetting command buffer {:#x} before its submission has completed. Check its fence first",
                        cb.as_raw()
                    ),
                );
            }
            state.clear_references(cb);
        }
        self.0.next.reset_command_buffer(cb)
    }

    // Recording. Each of these touches an object that must be memory
    // bound; the tracker resolves the binding and records the command
    // buffer's dependency on that allocation.

    fn record_object_use(&self, cb: vk::CommandBuffer, object: ObjectHandle, entry_point: &str) {
        let mut state = self.state();
        let recorded = match state.memory_binding(object) {
            Some(mem) => state.add_reference(cb, mem),
            None => false,
        };
        if !recorded {
            self.0.reporter.report(
                Severity::Error,
                DiagnosticCode::MemoryBindingError,
                cb.as_raw(),
                format!(
                    "In {} unable to record dependency of command buffer {:#x} on object {:#x}",
                    entry_point,
                    cb.as_raw(),
                    object.as_raw()
                ),
            );
        }
    }

    pub fn cmd_bind_pipeline(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.0.next.cmd_bind_pipeline(cb, bind_point, pipeline);
    }

    pub fn cmd_bind_vertex_buffers(&self, cb: vk::CommandBuffer, first_binding: u32, buffers: &[vk::Buffer]) {
        self.0.next.cmd_bind_vertex_buffers(cb, first_binding, buffers);
    }

    pub fn cmd_bind_index_buffer(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.0.next.cmd_bind_index_buffer(cb, buffer, offset, index_type);
    }

    pub fn cmd_draw_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        self.record_object_use(cb, ObjectHandle::from(buffer), "cmd_draw_indirect");
        self.0.next.cmd_draw_indirect(cb, buffer, offset, draw_count, stride);
    }

    pub fn cmd_draw_indexed_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        self.record_object_use(cb, ObjectHandle::from(buffer), "cmd_draw_indexed_indirect");
        self.0
            .next
            .cmd_draw_indexed_indirect(cb, buffer, offset, draw_count, stride);
    }

    pub fn cmd_dispatch_indirect(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize) {
        self.record_object_use(cb, ObjectHandle::from(buffer), "cmd_dispatch_indirect");
        self.0.next.cmd_dispatch_indirect(cb, buffer, offset);
    }

    pub fn cmd_copy_buffer(&self, cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer) {
        self.record_object_use(cb, ObjectHandle::from(src), "cmd_copy_buffer");
        self.record_object_use(cb, ObjectHandle::from(dst), "cmd_copy_buffer");
        self.0.next.cmd_copy_buffer(cb, src, dst);
    }

    pub fn cmd_copy_buffer_to_image(&self, cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Image) {
        self.record_object_use(cb, ObjectHandle::from(dst), "cmd_copy_buffer_to_image");
        self.record_object_use(cb, ObjectHandle::from(src), "cmd_copy_buffer_to_image");
        self.0.next.cmd_copy_buffer_to_image(cb, src, dst);
    }

    pub fn cmd_copy_image_to_buffer(&self, cb: vk::CommandBuffer, src: vk::Image, dst: vk::Buffer) {
        self.record_object_use(cb, ObjectHandle::from(src), "cmd_copy_image_to_buffer");
        self.record_object_use(cb, ObjectHandle::from(dst), "cmd_copy_image_to_buffer");
        self.0.next.cmd_copy_image_to_buffer(cb, src, dst);
    }

    pub fn cmd_update_buffer(
        &self,
        cb: vk::CommandBuffer,
        dst: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) {
        self.record_object_use(cb, ObjectHandle::from(dst), "cmd_update_buffer");
        self.0.next.cmd_update_buffer(cb, dst, offset, data);
    }

    pub fn cmd_fill_buffer(
        &self,
        cb: vk::CommandBuffer,
        dst: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) {
        self.record_object_use(cb, ObjectHandle::from(dst), "cmd_fill_buffer");
        self.0.next.cmd_fill_buffer(cb, dst, offset, size, data);
    }

    pub fn cmd_clear_color_image(&self, cb: vk::CommandBuffer, image: vk::Image) {
        self.record_object_use(cb, ObjectHandle::from(image), "cmd_clear_color_image");
        self.0.next.cmd_clear_color_image(cb, image);
    }

    pub fn cmd_clear_depth_stencil(&self, cb: vk::CommandBuffer, image: vk::Image, depth: f32, stencil: u32) {
        self.record_object_use(cb, ObjectHandle::from(image), "cmd_clear_depth_stencil");
        self.0.next.cmd_clear_depth_stencil(cb, image, depth, stencil);
    }

    pub fn cmd_resolve_image(&self, cb: vk::CommandBuffer, src: vk::Image, dst: vk::Image) {
        self.record_object_use(cb, ObjectHandle::from(src), "cmd_resolve_image");
        self.record_object_use(cb, ObjectHandle::from(dst), "cmd_resolve_image");
        self.0.next.cmd_resolve_image(cb, src, dst);
    }

    pub fn cmd_begin_query(&self, cb: vk::CommandBuffer, pool: vk::QueryPool, query: u32) {
        self.record_object_use(cb, ObjectHandle::from(pool), "cmd_begin_query");
        self.0.next.cmd_begin_query(cb, pool, query);
    }

    pub fn cmd_end_query(&self, cb: vk::CommandBuffer, pool: vk::QueryPool, query: u32) {
        self.record_object_use(cb, ObjectHandle::from(pool), "cmd_end_query");
        self.0.next.cmd_end_query(cb, pool, query);
    }

    pub fn cmd_reset_query_pool(
        &self,
        cb: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) {
        self.record_object_use(cb, ObjectHandle::from(pool), "cmd_reset_query_pool");
        self.0.next.cmd_reset_query_pool(cb, pool, first_query, query_count);
    }

    // Swapchain.

    pub fn create_swapchain(&self) -> VkResult<vk::SwapchainKHR> {
        let swapchain = self.0.next.create_swapchain()?;
        self.state().add_swapchain(swapchain);
        Ok(swapchain)
    }

    /// Queries the persistent images. The first successful query adopts
    /// each (image, memory) pair into the tracker; the memory is driver
    /// owned and must not be freed by the application.
    pub fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<SwapchainImage>> {
        let images = self.0.next.get_swapchain_images(swapchain)?;
        self.state().adopt_swapchain_images(swapchain, &images);
        Ok(images)
    }

    pub fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) -> VkResult<()> {
        {
            let mut state = self.state();
            state.destroy_swapchain(swapchain);
        }
        self.0.next.destroy_swapchain(swapchain)
    }
}
