//! Downstream dispatch: the interface to the next element of the
//! interposer chain.
//!
//! The original layer pattern resolves a table of function pointers at
//! initialization by chain-forwarding a `get_proc_address` query. Here
//! the table is a trait object: one implementation per loaded
//! interposer, resolved once when the layer is attached to a device.
//! Every intercepted entry point forwards its arguments to its peer in
//! this table and surfaces the peer's result code unchanged.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;

use crate::tracker::handles::ObjectHandle;
use crate::tracker::memory::AllocationDescriptor;
use crate::tracker::object::{
    BufferDescriptor, BufferViewDescriptor, DynamicStateKind, FenceDescriptor, ImageDescriptor,
    ImageViewDescriptor, PipelineDescriptor, QueryPoolDescriptor,
};
use crate::tracker::swapchain::SwapchainImage;

/// Dispatch table of the next interposer or the driver itself.
///
/// Recording (`cmd_*`) entry points cannot fail and return nothing, as
/// in the underlying API. Everything else surfaces a `vk::Result`.
pub trait NextDevice: Send + Sync {
    fn create_device(&self) -> VkResult<vk::Device>;
    fn destroy_device(&self, device: vk::Device) -> VkResult<()>;
    fn get_device_queue(&self, family_index: u32, queue_index: u32) -> VkResult<vk::Queue>;
    fn queue_submit(
        &self,
        queue: vk::Queue,
        cbs: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> VkResult<()>;
    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;
    fn device_wait_idle(&self) -> VkResult<()>;

    fn allocate_memory(&self, allocation: &AllocationDescriptor) -> VkResult<vk::DeviceMemory>;
    fn free_memory(&self, mem: vk::DeviceMemory) -> VkResult<()>;
    fn map_memory(
        &self,
        mem: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void>;
    fn unmap_memory(&self, mem: vk::DeviceMemory) -> VkResult<()>;
    fn bind_object_memory(
        &self,
        object: ObjectHandle,
        mem: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    #[allow(clippy::too_many_arguments)]
    fn queue_bind_sparse_buffer_memory(
        &self,
        queue: vk::Queue,
        buffer: vk::Buffer,
        range_offset: vk::DeviceSize,
        range_size: vk::DeviceSize,
        mem: vk::DeviceMemory,
        memory_offset: vk::DeviceSize,
    ) -> VkResult<()>;

    fn create_fence(&self, descriptor: &FenceDescriptor) -> VkResult<vk::Fence>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()>;
    /// `Ok(true)` when the fence is signalled, `Ok(false)` when not yet.
    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout_ns: u64,
    ) -> VkResult<()>;

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> VkResult<vk::Buffer>;
    fn create_buffer_view(&self, descriptor: &BufferViewDescriptor) -> VkResult<vk::BufferView>;
    fn create_image(&self, descriptor: &ImageDescriptor) -> VkResult<vk::Image>;
    fn create_image_view(&self, descriptor: &ImageViewDescriptor) -> VkResult<vk::ImageView>;
    fn create_event(&self) -> VkResult<vk::Event>;
    fn create_query_pool(&self, descriptor: &QueryPoolDescriptor) -> VkResult<vk::QueryPool>;
    fn create_sampler(&self) -> VkResult<vk::Sampler>;
    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> VkResult<vk::Pipeline>;
    fn create_dynamic_state(&self, kind: DynamicStateKind) -> VkResult<ObjectHandle>;
    fn destroy_object(&self, object: ObjectHandle) -> VkResult<()>;

    fn create_command_buffer(&self) -> VkResult<vk::CommandBuffer>;
    fn begin_command_buffer(&self, cb: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, cb: vk::CommandBuffer) -> VkResult<()>;

    fn cmd_bind_pipeline(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    fn cmd_bind_vertex_buffers(&self, cb: vk::CommandBuffer, first_binding: u32, buffers: &[vk::Buffer]);
    fn cmd_bind_index_buffer(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_draw_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    );
    fn cmd_draw_indexed_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    );
    fn cmd_dispatch_indirect(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize);
    fn cmd_copy_buffer(&self, cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer);
    fn cmd_copy_buffer_to_image(&self, cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Image);
    fn cmd_copy_image_to_buffer(&self, cb: vk::CommandBuffer, src: vk::Image, dst: vk::Buffer);
    fn cmd_update_buffer(
        &self,
        cb: vk::CommandBuffer,
        dst: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    );
    fn cmd_fill_buffer(
        &self,
        cb: vk::CommandBuffer,
        dst: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    );
    fn cmd_clear_color_image(&self, cb: vk::CommandBuffer, image: vk::Image);
    fn cmd_clear_depth_stencil(&self, cb: vk::CommandBuffer, image: vk::Image, depth: f32, stencil: u32);
    fn cmd_resolve_image(&self, cb: vk::CommandBuffer, src: vk::Image, dst: vk::Image);
    fn cmd_begin_query(&self, cb: vk::CommandBuffer, pool: vk::QueryPool, query: u32);
    fn cmd_end_query(&self, cb: vk::CommandBuffer, pool: vk::QueryPool, query: u32);
    fn cmd_reset_query_pool(
        &self,
        cb: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    );

    fn create_swapchain(&self) -> VkResult<vk::SwapchainKHR>;
    fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<SwapchainImage>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) -> VkResult<()>;

    /// Chain query: whether any element further down handles `name`.
    fn handles_entry_point(&self, name: &str) -> bool {
        let _ = name;
        false
    }
}

/// Terminal element of an interposer chain.
///
/// Hands out fresh handles from a counter, succeeds at everything and
/// executes nothing. Used as the chain end in headless setups and as the
/// driver stand-in for the tracker's integration tests.
pub struct NullDevice {
    next_raw: AtomicU64,
    swapchain_image_count: u32,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            next_raw: AtomicU64::new(1),
            swapchain_image_count: 2,
        }
    }

    pub fn with_swapchain_image_count(mut self, count: u32) -> Self {
        self.swapchain_image_count = count;
        self
    }

    fn mint<H: Handle>(&self) -> H {
        H::from_raw(self.next_raw.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NextDevice for NullDevice {
    fn create_device(&self) -> VkResult<vk::Device> {
        Ok(self.mint())
    }

    fn destroy_device(&self, _device: vk::Device) -> VkResult<()> {
        Ok(())
    }

    fn get_device_queue(&self, _family_index: u32, _queue_index: u32) -> VkResult<vk::Queue> {
        Ok(self.mint())
    }

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        _cbs: &[vk::CommandBuffer],
        _fence: vk::Fence,
    ) -> VkResult<()> {
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        Ok(())
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        Ok(())
    }

    fn allocate_memory(&self, _allocation: &AllocationDescriptor) -> VkResult<vk::DeviceMemory> {
        Ok(self.mint())
    }

    fn free_memory(&self, _mem: vk::DeviceMemory) -> VkResult<()> {
        Ok(())
    }

    fn map_memory(
        &self,
        _mem: vk::DeviceMemory,
        _offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        Ok(NonNull::<c_void>::dangling().as_ptr())
    }

    fn unmap_memory(&self, _mem: vk::DeviceMemory) -> VkResult<()> {
        Ok(())
    }

    fn bind_object_memory(
        &self,
        _object: ObjectHandle,
        _mem: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VkResult<()> {
        Ok(())
    }

    fn queue_bind_sparse_buffer_memory(
        &self,
        _queue: vk::Queue,
        _buffer: vk::Buffer,
        _range_offset: vk::DeviceSize,
        _range_size: vk::DeviceSize,
        _mem: vk::DeviceMemory,
        _memory_offset: vk::DeviceSize,
    ) -> VkResult<()> {
        Ok(())
    }

    fn create_fence(&self, _descriptor: &FenceDescriptor) -> VkResult<vk::Fence> {
        Ok(self.mint())
    }

    fn reset_fences(&self, _fences: &[vk::Fence]) -> VkResult<()> {
        Ok(())
    }

    fn get_fence_status(&self, _fence: vk::Fence) -> VkResult<bool> {
        Ok(true)
    }

    fn wait_for_fences(
        &self,
        _fences: &[vk::Fence],
        _wait_all: bool,
        _timeout_ns: u64,
    ) -> VkResult<()> {
        Ok(())
    }

    fn create_buffer(&self, _descriptor: &BufferDescriptor) -> VkResult<vk::Buffer> {
        Ok(self.mint())
    }

    fn create_buffer_view(&self, _descriptor: &BufferViewDescriptor) -> VkResult<vk::BufferView> {
        Ok(self.mint())
    }

    fn create_image(&self, _descriptor: &ImageDescriptor) -> VkResult<vk::Image> {
        Ok(self.mint())
    }

    fn create_image_view(&self, _descriptor: &ImageViewDescriptor) -> VkResult<vk::ImageView> {
        Ok(self.mint())
    }

    fn create_event(&self) -> VkResult<vk::Event> {
        Ok(self.mint())
    }

    fn create_query_pool(&self, _descriptor: &QueryPoolDescriptor) -> VkResult<vk::QueryPool> {
        Ok(self.mint())
    }

    fn create_sampler(&self) -> VkResult<vk::Sampler> {
        Ok(self.mint())
    }

    fn create_pipeline(&self, _descriptor: &PipelineDescriptor) -> VkResult<vk::Pipeline> {
        Ok(self.mint())
    }

    fn create_dynamic_state(&self, _kind: DynamicStateKind) -> VkResult<ObjectHandle> {
        Ok(ObjectHandle::from_raw(
            self.next_raw.fetch_add(1, Ordering::Relaxed),
        ))
    }

    fn destroy_object(&self, _object: ObjectHandle) -> VkResult<()> {
        Ok(())
    }

    fn create_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        Ok(self.mint())
    }

    fn begin_command_buffer(&self, _cb: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn end_command_buffer(&self, _cb: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn reset_command_buffer(&self, _cb: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn cmd_bind_pipeline(
        &self,
        _cb: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _pipeline: vk::Pipeline,
    ) {
    }

    fn cmd_bind_vertex_buffers(&self, _cb: vk::CommandBuffer, _first_binding: u32, _buffers: &[vk::Buffer]) {}

    fn cmd_bind_index_buffer(
        &self,
        _cb: vk::CommandBuffer,
        _buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
    }

    fn cmd_draw_indirect(
        &self,
        _cb: vk::CommandBuffer,
        _buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _draw_count: u32,
        _stride: u32,
    ) {
    }

    fn cmd_draw_indexed_indirect(
        &self,
        _cb: vk::CommandBuffer,
        _buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _draw_count: u32,
        _stride: u32,
    ) {
    }

    fn cmd_dispatch_indirect(&self, _cb: vk::CommandBuffer, _buffer: vk::Buffer, _offset: vk::DeviceSize) {}

    fn cmd_copy_buffer(&self, _cb: vk::CommandBuffer, _src: vk::Buffer, _dst: vk::Buffer) {}

    fn cmd_copy_buffer_to_image(&self, _cb: vk::CommandBuffer, _src: vk::Buffer, _dst: vk::Image) {}

    fn cmd_copy_image_to_buffer(&self, _cb: vk::CommandBuffer, _src: vk::Image, _dst: vk::Buffer) {}

    fn cmd_update_buffer(
        &self,
        _cb: vk::CommandBuffer,
        _dst: vk::Buffer,
        _offset: vk::DeviceSize,
        _data: &[u8],
    ) {
    }

    fn cmd_fill_buffer(
        &self,
        _cb: vk::CommandBuffer,
        _dst: vk::Buffer,
        _offset: vk::DeviceSize,
        _size: vk::DeviceSize,
        _data: u32,
    ) {
    }

    fn cmd_clear_color_image(&self, _cb: vk::CommandBuffer, _image: vk::Image) {}

    fn cmd_clear_depth_stencil(&self, _cb: vk::CommandBuffer, _image: vk::Image, _depth: f32, _stencil: u32) {}

    fn cmd_resolve_image(&self, _cb: vk::CommandBuffer, _src: vk::Image, _dst: vk::Image) {}

    fn cmd_begin_query(&self, _cb: vk::CommandBuffer, _pool: vk::QueryPool, _query: u32) {}

    fn cmd_end_query(&self, _cb: vk::CommandBuffer, _pool: vk::QueryPool, _query: u32) {}

    fn cmd_reset_query_pool(
        &self,
        _cb: vk::CommandBuffer,
        _pool: vk::QueryPool,
        _first_query: u32,
        _query_count: u32,
    ) {
    }

    fn create_swapchain(&self) -> VkResult<vk::SwapchainKHR> {
        Ok(self.mint())
    }

    fn get_swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> VkResult<Vec<SwapchainImage>> {
        let images = (0..self.swapchain_image_count)
            .map(|_| SwapchainImage {
                image: self.mint(),
                memory: self.mint(),
            })
            .collect();
        Ok(images)
    }

    fn destroy_swapchain(&self, _swapchain: vk::SwapchainKHR) -> VkResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_device_mints_distinct_handles() {
        let device = NullDevice::new();
        let a: vk::Buffer = device.mint();
        let b: vk::Buffer = device.mint();
        assert_ne!(a, b);
    }

    #[test]
    fn null_device_reports_swapchain_images() {
        let device = NullDevice::new().with_swapchain_image_count(3);
        let swapchain = device.create_swapchain().unwrap();
        let images = device.get_swapchain_images(swapchain).unwrap();
        assert_eq!(images.len(), 3);
        assert_ne!(images[0].image, images[1].image);
    }
}
