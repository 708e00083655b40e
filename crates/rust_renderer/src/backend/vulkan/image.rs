//! GPU image resource
//!
//! Wraps an image, its device memory and an optional view. Used directly for
//! the swapchain depth attachment.

use ash::vk;

use super::device::VulkanDevice;
use super::error::{check, VulkanResult};

/// Image with bound memory and an optional view
#[derive(Debug, Default)]
pub struct Image {
    handle: vk::Image,
    memory: vk::DeviceMemory,
    view: Option<vk::ImageView>,
    width: u32,
    height: u32,
}

/// Parameters for [`Image::create`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDescriptor {
    /// Image dimensionality
    pub image_type: vk::ImageType,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Texel format
    pub format: vk::Format,
    /// Memory tiling
    pub tiling: vk::ImageTiling,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Required memory properties
    pub memory_flags: vk::MemoryPropertyFlags,
    /// Aspect of the view to create, `None` for no view
    pub view_aspect: Option<vk::ImageAspectFlags>,
}

impl ImageDescriptor {
    /// Device-local depth attachment with a depth-aspect view
    pub const fn depth_attachment(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            width,
            height,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            view_aspect: Some(vk::ImageAspectFlags::DEPTH),
        }
    }
}

/// Native object owned by an [`Image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImagePart {
    View(vk::ImageView),
    Image(vk::Image),
    Memory(vk::DeviceMemory),
}

impl Image {
    /// Create an image, allocate and bind its memory, and optionally a view
    pub fn create(device: &VulkanDevice, descriptor: &ImageDescriptor) -> VulkanResult<Self> {
        let logical = &device.logical;

        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(descriptor.image_type)
            .extent(vk::Extent3D {
                width: descriptor.width,
                height: descriptor.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(descriptor.format)
            .tiling(descriptor.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(descriptor.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = check(unsafe { logical.create_image(&image_create_info, None) }, "vkCreateImage")?;

        let mut image = Self {
            handle,
            width: descriptor.width,
            height: descriptor.height,
            ..Self::default()
        };

        let memory_requirements = unsafe { logical.get_image_memory_requirements(handle) };
        let memory_type_index = match device.find_memory_index(memory_requirements.memory_type_bits, descriptor.memory_flags) {
            Ok(index) => index,
            Err(err) => {
                log::error!("Required memory type not found. Image not valid.");
                image.destroy(device);
                return Err(err);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(memory_requirements.size)
            .memory_type_index(memory_type_index);

        let bound = check(unsafe { logical.allocate_memory(&alloc_info, None) }, "vkAllocateMemory").and_then(|memory| {
            image.memory = memory;
            check(unsafe { logical.bind_image_memory(handle, memory, 0) }, "vkBindImageMemory")
        });

        let with_view = bound.and_then(|()| match descriptor.view_aspect {
            Some(aspect) => image.create_view(device, descriptor.format, aspect),
            None => Ok(()),
        });

        if let Err(err) = with_view {
            image.destroy(device);
            return Err(err);
        }

        Ok(image)
    }

    /// Create a 2D view over the image
    pub fn create_view(&mut self, device: &VulkanDevice, format: vk::Format, aspect: vk::ImageAspectFlags) -> VulkanResult<()> {
        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(self.handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = check(
            unsafe { device.logical.create_image_view(&view_create_info, None) },
            "vkCreateImageView",
        )?;
        self.view = Some(view);
        Ok(())
    }

    /// Destroy the view, then the image, then free the memory
    pub fn destroy(&mut self, device: &VulkanDevice) {
        let logical = &device.logical;
        self.destroy_with(|part| unsafe {
            match part {
                ImagePart::View(view) => logical.destroy_image_view(view, None),
                ImagePart::Image(image) => logical.destroy_image(image, None),
                ImagePart::Memory(memory) => logical.free_memory(memory, None),
            }
        });
    }

    /// Release every part that exists, in teardown order. Null parts are skipped.
    pub(crate) fn destroy_with<F>(&mut self, mut release: F)
    where
        F: FnMut(ImagePart),
    {
        if let Some(view) = self.view.take() {
            release(ImagePart::View(view));
        }
        if self.handle != vk::Image::null() {
            release(ImagePart::Image(self.handle));
            self.handle = vk::Image::null();
        }
        if self.memory != vk::DeviceMemory::null() {
            release(ImagePart::Memory(self.memory));
            self.memory = vk::DeviceMemory::null();
        }
    }

    /// Image handle
    pub const fn handle(&self) -> vk::Image {
        self.handle
    }

    /// View handle, if a view was created
    pub const fn view(&self) -> Option<vk::ImageView> {
        self.view
    }

    /// Width in pixels
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub const fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_destroying_default_image_releases_nothing() {
        let mut image = Image::default();
        let mut released = Vec::new();
        image.destroy_with(|part| released.push(part));
        assert!(released.is_empty());
    }

    #[test]
    fn test_destroy_order_is_view_image_memory() {
        let mut image = Image {
            handle: vk::Image::from_raw(10),
            memory: vk::DeviceMemory::from_raw(20),
            view: Some(vk::ImageView::from_raw(30)),
            width: 64,
            height: 64,
        };

        let mut released = Vec::new();
        image.destroy_with(|part| released.push(part));
        image.destroy_with(|part| released.push(part));

        assert_eq!(
            released,
            vec![
                ImagePart::View(vk::ImageView::from_raw(30)),
                ImagePart::Image(vk::Image::from_raw(10)),
                ImagePart::Memory(vk::DeviceMemory::from_raw(20)),
            ]
        );
        assert_eq!(image.view(), None);
        assert_eq!(image.handle(), vk::Image::null());
    }

    #[test]
    fn test_depth_attachment_descriptor() {
        let descriptor = ImageDescriptor::depth_attachment(800, 600, vk::Format::D32_SFLOAT);
        assert_eq!((descriptor.width, descriptor.height), (800, 600));
        assert_eq!(descriptor.format, vk::Format::D32_SFLOAT);
        assert_eq!(descriptor.view_aspect, Some(vk::ImageAspectFlags::DEPTH));
        assert_eq!(descriptor.memory_flags, vk::MemoryPropertyFlags::DEVICE_LOCAL);
    }
}
