//! Object records and their kind tagged creation descriptors.
//!
//! The tracker keeps a distilled copy of each object's creation
//! descriptor rather than the raw create-info structure. The descriptor
//! payload depends on the kind, so the record stores a tagged variant;
//! notably the fence signalled bit lives in the fence variant only.

use ash::vk;

use crate::tracker::handles::ObjectHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl BufferDescriptor {
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self { size, usage }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferViewDescriptor {
    pub buffer: vk::Buffer,
    pub format: vk::Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

impl ImageDescriptor {
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            format,
            usage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageViewDescriptor {
    pub image: vk::Image,
    pub format: vk::Format,
}

/// Fence descriptor. The create flags double as the live state: the
/// SIGNALED bit is set on creation when requested and then maintained by
/// the fence tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceDescriptor {
    pub flags: vk::FenceCreateFlags,
}

impl FenceDescriptor {
    pub fn new(flags: vk::FenceCreateFlags) -> Self {
        Self { flags }
    }

    pub fn is_signalled(&self) -> bool {
        self.flags.contains(vk::FenceCreateFlags::SIGNALED)
    }

    pub(super) fn set_signalled(&mut self, signalled: bool) {
        if signalled {
            self.flags |= vk::FenceCreateFlags::SIGNALED;
        } else {
            self.flags &= !vk::FenceCreateFlags::SIGNALED;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPoolDescriptor {
    pub query_type: vk::QueryType,
    pub query_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineDescriptor {
    pub bind_point: vk::PipelineBindPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicStateKind {
    Viewport,
    Raster,
    ColorBlend,
    DepthStencil,
}

/// Kind tag plus the distilled creation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Buffer(BufferDescriptor),
    BufferView(BufferViewDescriptor),
    Image(ImageDescriptor),
    ImageView(ImageViewDescriptor),
    Fence(FenceDescriptor),
    Event,
    QueryPool(QueryPoolDescriptor),
    Sampler,
    Pipeline(PipelineDescriptor),
    DynamicState(DynamicStateKind),
    /// Persistent image adopted from a swapchain; its creation descriptor
    /// belongs to the driver.
    SwapchainImage,
}

impl ObjectKind {
    pub const fn name(&self) -> &'static str {
        match self {
            ObjectKind::Buffer(_) => "buffer",
            ObjectKind::BufferView(_) => "buffer_view",
            ObjectKind::Image(_) => "image",
            ObjectKind::ImageView(_) => "image_view",
            ObjectKind::Fence(_) => "fence",
            ObjectKind::Event => "event",
            ObjectKind::QueryPool(_) => "query_pool",
            ObjectKind::Sampler => "sampler",
            ObjectKind::Pipeline(_) => "pipeline",
            ObjectKind::DynamicState(_) => "dynamic_state",
            ObjectKind::SwapchainImage => "persistent_image",
        }
    }
}

/// Bookkeeping record for one created object.
pub struct ObjectInfo {
    handle: ObjectHandle,
    kind: ObjectKind,
    binding: Option<vk::DeviceMemory>,
}

impl ObjectInfo {
    pub fn new(handle: ObjectHandle, kind: ObjectKind) -> Self {
        Self {
            handle,
            kind,
            binding: None,
        }
    }

    pub fn get_handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn get_kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// The memory this object is bound to, if any. At most one binding.
    pub fn binding(&self) -> Option<vk::DeviceMemory> {
        self.binding
    }

    pub(super) fn set_binding(&mut self, binding: Option<vk::DeviceMemory>) {
        self.binding = binding;
    }

    pub fn fence(&self) -> Option<&FenceDescriptor> {
        match &self.kind {
            ObjectKind::Fence(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    pub(super) fn fence_mut(&mut self) -> Option<&mut FenceDescriptor> {
        match &mut self.kind {
            ObjectKind::Fence(descriptor) => Some(descriptor),
            _ => None,
        }
    }
}
