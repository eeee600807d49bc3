use ash::vk;

/// One persistent image of a swapchain together with the driver owned
/// allocation backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
}

/// Bookkeeping record for one swapchain. The image list is adopted on
/// the first successful image query and stays fixed for the swapchain's
/// lifetime.
#[derive(Default)]
pub struct SwapchainInfo {
    images: Vec<SwapchainImage>,
}

impl SwapchainInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    pub(super) fn adopt_images(&mut self, images: &[SwapchainImage]) {
        self.images = images.to_vec();
    }

    /// True when a later image query reported a different list than the
    /// one recorded.
    pub fn images_mismatch(&self, images: &[SwapchainImage]) -> bool {
        self.images.as_slice() != images
    }
}
