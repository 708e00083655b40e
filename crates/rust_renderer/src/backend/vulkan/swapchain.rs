//! Vulkan swapchain management
//!
//! Negotiates format, present mode, extent and image count with the surface,
//! creates one colour view per presentable image and owns the depth
//! attachment. The presentable images themselves belong to the presentation
//! engine. A swapchain is recreated in place when the surface changes.

use ash::extensions::khr::Surface;
use ash::{vk, Instance};

use super::device::VulkanDevice;
use super::error::{check, VulkanError, VulkanResult};
use super::image::{Image, ImageDescriptor};
use super::physical_device::{QueueFamilyIndices, SwapchainSupportInfo};

/// Frames that may be in flight on the GPU at once
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Prefer 8-bit BGRA with a non-linear sRGB colour space, else the first format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|sf| {
        sf.format == vk::Format::B8G8R8A8_UNORM && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    match preferred {
        Some(format) => Some(*format),
        None => {
            let fallback = formats.first().copied();
            if let Some(format) = fallback {
                log::warn!("Preferred surface format unavailable, using {:?}", format.format);
            }
            fallback
        }
    }
}

/// Prefer mailbox, fall back to FIFO which every device supports
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's current extent when defined, else clamp the request
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: width.clamp(min.width, max.width),
        height: height.clamp(min.height, max.height),
    }
}

/// One more image than the minimum, bounded by the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        image_count.min(capabilities.max_image_count)
    } else {
        image_count
    }
}

/// Concurrent sharing across graphics and present when they differ
pub fn choose_sharing_mode(families: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    match (families.graphics, families.present) {
        (Some(graphics), Some(present)) if graphics != present => {
            (vk::SharingMode::CONCURRENT, vec![graphics, present])
        }
        _ => (vk::SharingMode::EXCLUSIVE, Vec::new()),
    }
}

/// Interpret the result of an image acquisition.
///
/// `Ok(None)` means the swapchain is out of date and must be recreated.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> VulkanResult<Option<u32>> {
    match result {
        Ok((index, suboptimal)) => {
            if suboptimal {
                log::debug!("Acquired image {} from a suboptimal swapchain", index);
            }
            Ok(Some(index))
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
        Err(code) => {
            log::error!("Failed to acquire swapchain image: {:?}", code);
            Err(VulkanError::from_result("vkAcquireNextImageKHR", code))
        }
    }
}

/// Interpret the result of a present.
///
/// `Ok(true)` means the swapchain is out of date or suboptimal and must be
/// recreated.
pub fn classify_present(result: Result<bool, vk::Result>) -> VulkanResult<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(code) => {
            log::error!("Failed to present swap chain image: {:?}", code);
            Err(VulkanError::from_result("vkQueuePresentKHR", code))
        }
    }
}

/// Everything negotiated with the surface before a swapchain is created
#[derive(Debug, Clone)]
pub struct SwapchainSettings {
    /// Colour format and colour space
    pub surface_format: vk::SurfaceFormatKHR,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Image size
    pub extent: vk::Extent2D,
    /// Minimum number of images to request
    pub min_image_count: u32,
    /// Sharing mode and the families sharing the images
    pub sharing_mode: vk::SharingMode,
    /// Queue families listed when sharing is concurrent
    pub queue_family_indices: Vec<u32>,
    /// Surface transform to apply
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainSettings {
    /// Negotiate settings for a `width` x `height` window.
    ///
    /// Both creation and recreation go through here.
    pub fn negotiate(
        support: &SwapchainSupportInfo,
        families: &QueueFamilyIndices,
        width: u32,
        height: u32,
    ) -> VulkanResult<Self> {
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| VulkanError::Unsupported("surface reports no formats".to_string()))?;
        let (sharing_mode, queue_family_indices) = choose_sharing_mode(families);

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, width, height),
            min_image_count: choose_image_count(&support.capabilities),
            sharing_mode,
            queue_family_indices,
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Swapchain with its colour views and depth attachment
#[derive(Debug, Default)]
pub struct Swapchain {
    image_format: vk::SurfaceFormatKHR,
    handle: vk::SwapchainKHR,
    extent: vk::Extent2D,
    image_count: u32,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth_attachment: Image,
}

impl Swapchain {
    /// Create a new swapchain
    pub fn create(
        instance: &Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        device: &mut VulkanDevice,
        width: u32,
        height: u32,
    ) -> VulkanResult<Self> {
        let mut swapchain = Self::default();
        swapchain.build(instance, surface_loader, surface, device, width, height)?;
        Ok(swapchain)
    }

    /// Recreate the swapchain with new dimensions, reusing this record.
    ///
    /// Waits for the device to go idle first so no submitted work still
    /// references the old views.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        device: &mut VulkanDevice,
        width: u32,
        height: u32,
    ) -> VulkanResult<()> {
        device.wait_idle()?;
        self.destroy(device);
        self.build(instance, surface_loader, surface, device, width, height)
    }

    fn build(
        &mut self,
        instance: &Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        device: &mut VulkanDevice,
        width: u32,
        height: u32,
    ) -> VulkanResult<()> {
        // Capabilities change with the window, always ask again.
        device.requery_swapchain_support(surface_loader, surface)?;
        let settings = SwapchainSettings::negotiate(
            &device.physical.swapchain_support,
            &device.physical.queue_families,
            width,
            height,
        )?;
        self.image_format = settings.surface_format;
        self.extent = settings.extent;
        let present_mode = settings.present_mode;

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(settings.min_image_count)
            .image_format(self.image_format.format)
            .image_color_space(self.image_format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(settings.sharing_mode)
            .queue_family_indices(&settings.queue_family_indices)
            .pre_transform(settings.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.handle = check(
            unsafe { device.swapchain_loader.create_swapchain(&create_info, None) },
            "vkCreateSwapchainKHR",
        )?;

        self.images = check(
            unsafe { device.swapchain_loader.get_swapchain_images(self.handle) },
            "vkGetSwapchainImagesKHR",
        )?;
        self.image_count = self.images.len() as u32;

        self.views.clear();
        self.views.reserve(self.images.len());
        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.image_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = check(
                unsafe { device.logical.create_image_view(&view_info, None) },
                "vkCreateImageView",
            )?;
            self.views.push(view);
        }

        let depth_format = device.detect_depth_format(instance)?;
        self.depth_attachment = Image::create(
            device,
            &ImageDescriptor::depth_attachment(self.extent.width, self.extent.height, depth_format),
        )?;

        log::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            self.extent.width,
            self.extent.height,
            self.image_count,
            self.image_format.format,
            present_mode
        );
        Ok(())
    }

    /// Destroy the depth attachment, the colour views and the swapchain.
    ///
    /// The presentable images go away with the swapchain handle.
    pub fn destroy(&mut self, device: &VulkanDevice) {
        self.depth_attachment.destroy(device);

        unsafe {
            for view in self.views.drain(..) {
                device.logical.destroy_image_view(view, None);
            }

            if self.handle != vk::SwapchainKHR::null() {
                device.swapchain_loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }

    /// Acquire the next presentable image
    pub fn acquire_next_image_index(
        &self,
        device: &VulkanDevice,
        timeout_ns: u64,
        image_available: vk::Semaphore,
        fence: vk::Fence,
    ) -> VulkanResult<Option<u32>> {
        classify_acquire(unsafe {
            device
                .swapchain_loader
                .acquire_next_image(self.handle, timeout_ns, image_available, fence)
        })
    }

    /// Queue an image for presentation once `render_complete` is signaled.
    ///
    /// Returns `true` when the swapchain must be recreated.
    pub fn present(
        &self,
        device: &VulkanDevice,
        present_queue: vk::Queue,
        render_complete: vk::Semaphore,
        image_index: u32,
    ) -> VulkanResult<bool> {
        let wait_semaphores = [render_complete];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        classify_present(unsafe { device.swapchain_loader.queue_present(present_queue, &present_info) })
    }

    /// Chosen surface format
    pub const fn image_format(&self) -> vk::SurfaceFormatKHR {
        self.image_format
    }

    /// Swapchain handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Extent of the presentable images
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of presentable images
    pub const fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Colour views, one per presentable image
    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// Depth attachment shared by every framebuffer
    pub const fn depth_attachment(&self) -> &Image {
        &self.depth_attachment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    #[test]
    fn test_extent_clamped_into_surface_bounds() {
        let caps = capabilities(2, 3);

        let zero = choose_extent(&caps, 0, 0);
        assert_eq!((zero.width, zero.height), (1, 1));

        let huge = choose_extent(&caps, 100_000, u32::MAX - 1);
        assert_eq!((huge.width, huge.height), (4096, 4096));

        let mixed = choose_extent(&caps, 800, 0);
        assert_eq!((mixed.width, mixed.height), (800, 1));
    }

    #[test]
    fn test_defined_current_extent_is_used_verbatim() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D { width: 1920, height: 1080 };

        let extent = choose_extent(&caps, 10, 10);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&capabilities(1, 3)), 2);
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
        // No upper bound
        assert_eq!(choose_image_count(&capabilities(3, 0)), 4);
    }

    fn support(caps: vk::SurfaceCapabilitiesKHR) -> SwapchainSupportInfo {
        SwapchainSupportInfo {
            capabilities: caps,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn test_negotiated_settings() {
        let families = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(1),
            ..Default::default()
        };

        let settings = SwapchainSettings::negotiate(&support(capabilities(2, 8)), &families, 800, 600).unwrap();
        assert_eq!(settings.surface_format.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(settings.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!((settings.extent.width, settings.extent.height), (800, 600));
        assert_eq!(settings.min_image_count, 3);
        assert_eq!(settings.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(settings.queue_family_indices, vec![0, 1]);
    }

    #[test]
    fn test_resize_renegotiates_extent_not_image_count() {
        let families = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
            ..Default::default()
        };
        let support = support(capabilities(2, 3));

        let created = SwapchainSettings::negotiate(&support, &families, 800, 600).unwrap();
        let recreated = SwapchainSettings::negotiate(&support, &families, 1024, 5000).unwrap();
        assert_eq!(created.min_image_count, recreated.min_image_count);
        assert_eq!((recreated.extent.width, recreated.extent.height), (1024, 4096));
        assert_eq!((created.extent.width, created.extent.height), (800, 600));
    }

    #[test]
    fn test_negotiation_fails_without_formats() {
        let mut support = support(capabilities(2, 3));
        support.formats.clear();
        assert!(matches!(
            SwapchainSettings::negotiate(&support, &QueueFamilyIndices::default(), 800, 600),
            Err(VulkanError::Unsupported(_))
        ));
    }

    #[test]
    fn test_surface_format_preference_and_fallback() {
        let linear = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        let chosen = choose_surface_format(&[linear, preferred]).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);

        let chosen = choose_surface_format(&[linear]).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);

        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_preference() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_sharing_mode() {
        let shared = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
            ..Default::default()
        };
        assert_eq!(choose_sharing_mode(&shared), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(2),
            ..Default::default()
        };
        assert_eq!(choose_sharing_mode(&split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn test_acquire_results() {
        assert_eq!(classify_acquire(Ok((1, false))).unwrap(), Some(1));
        assert_eq!(classify_acquire(Ok((2, true))).unwrap(), Some(2));
        assert_eq!(classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(), None);
        assert!(matches!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)), Err(VulkanError::DeviceLost)));
    }

    #[test]
    fn test_present_results() {
        assert!(!classify_present(Ok(false)).unwrap());
        assert!(classify_present(Ok(true)).unwrap());
        assert!(classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }
}
