//! Logical device and queues
//!
//! The logical device owns the queue handles (never destroyed individually)
//! and the graphics command pool. It also carries the cached capabilities of
//! the physical device it was created from.

use std::ffi::CString;

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};

use super::error::{check, VulkanError, VulkanResult};
use super::physical_device::{PhysicalDeviceInfo, SwapchainSupportInfo};
use crate::config::DeviceRequirements;

/// Depth formats tried for the depth attachment, in priority order
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Pick the first depth format usable as a depth/stencil attachment.
///
/// `format_properties` reports what the device supports for a format; either
/// linear or optimal tiling support qualifies.
pub fn choose_depth_format(format_properties: impl Fn(vk::Format) -> vk::FormatProperties) -> Option<vk::Format> {
    let flags = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    DEPTH_FORMAT_CANDIDATES.into_iter().find(|&format| {
        let properties = format_properties(format);
        properties.linear_tiling_features.contains(flags) || properties.optimal_tiling_features.contains(flags)
    })
}

/// Find a memory type matching a type filter and property flags
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        (type_filter & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}

/// Selected physical device plus its logical device
pub struct VulkanDevice {
    /// Physical device and cached capabilities
    pub physical: PhysicalDeviceInfo,
    /// Vulkan logical device handle
    pub logical: Device,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Compute queue, null when no family was assigned
    pub compute_queue: vk::Queue,
    /// Transfer queue, null when no family was assigned
    pub transfer_queue: vk::Queue,
    /// Pool for graphics command buffers
    pub graphics_command_pool: vk::CommandPool,
    /// Depth format detected for the depth attachment
    pub depth_format: vk::Format,
}

impl VulkanDevice {
    /// Select a physical device and create the logical device with its queues
    pub fn create(
        instance: &Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        requirements: &DeviceRequirements,
    ) -> VulkanResult<Self> {
        let physical = PhysicalDeviceInfo::select(instance, surface_loader, surface, requirements)?;
        let families = physical.queue_families;

        log::info!("Creating logical device...");
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_names = requirements
            .device_extension_names
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid extension name: {}", e)))?;
        let extension_ptrs: Vec<*const std::os::raw::c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(requirements.sampler_anisotropy)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&device_features);

        let logical = check(
            unsafe { instance.create_device(physical.device, &create_info, None) },
            "vkCreateDevice",
        )?;
        log::info!("Logical device created.");

        let queue = |family: Option<u32>| {
            family.map_or_else(vk::Queue::null, |index| unsafe { logical.get_device_queue(index, 0) })
        };
        let graphics_queue = queue(families.graphics);
        let present_queue = queue(families.present);
        let compute_queue = queue(families.compute);
        let transfer_queue = queue(families.transfer);
        log::info!("Queues obtained.");

        let swapchain_loader = SwapchainLoader::new(instance, &logical);

        let mut device = Self {
            physical,
            logical,
            swapchain_loader,
            graphics_queue,
            present_queue,
            compute_queue,
            transfer_queue,
            graphics_command_pool: vk::CommandPool::null(),
            depth_format: vk::Format::UNDEFINED,
        };

        if let Some(graphics_family) = families.graphics {
            let pool_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(graphics_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            match check(
                unsafe { device.logical.create_command_pool(&pool_info, None) },
                "vkCreateCommandPool",
            ) {
                Ok(pool) => device.graphics_command_pool = pool,
                Err(err) => {
                    device.destroy();
                    return Err(err);
                }
            }
            log::info!("Graphics command pool created.");
        }

        Ok(device)
    }

    /// Graphics queue family index
    pub fn graphics_family(&self) -> Option<u32> {
        self.physical.queue_families.graphics
    }

    /// Present queue family index
    pub fn present_family(&self) -> Option<u32> {
        self.physical.queue_families.present
    }

    /// Re-query surface support; capabilities change with the window
    pub fn requery_swapchain_support(&mut self, surface_loader: &Surface, surface: vk::SurfaceKHR) -> VulkanResult<()> {
        self.physical.swapchain_support = SwapchainSupportInfo::query(surface_loader, self.physical.device, surface)?;
        Ok(())
    }

    /// Detect and store the depth format for the depth attachment
    pub fn detect_depth_format(&mut self, instance: &Instance) -> VulkanResult<vk::Format> {
        let physical_device = self.physical.device;
        let format = choose_depth_format(|format| unsafe {
            instance.get_physical_device_format_properties(physical_device, format)
        })
        .ok_or_else(|| {
            log::error!("Failed to find a supported depth format");
            VulkanError::Unsupported("depth/stencil attachment format".to_string())
        })?;

        self.depth_format = format;
        Ok(format)
    }

    /// Memory type index for the given filter and property flags
    pub fn find_memory_index(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.physical.memory_properties, type_filter, properties).ok_or_else(|| {
            log::warn!("Unable to find suitable memory type for {:?}", properties);
            VulkanError::NoSuitableMemoryType
        })
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        check(unsafe { self.logical.device_wait_idle() }, "vkDeviceWaitIdle")
    }

    /// Destroy the command pool and the logical device.
    ///
    /// Queue handles are only invalidated, never destroyed.
    pub fn destroy(&mut self) {
        log::info!("Destroying logical device...");
        unsafe {
            if self.graphics_command_pool == vk::CommandPool::null() {
                log::warn!("Graphics command pool already destroyed");
            } else {
                self.logical.destroy_command_pool(self.graphics_command_pool, None);
                self.graphics_command_pool = vk::CommandPool::null();
            }

            self.graphics_queue = vk::Queue::null();
            self.present_queue = vk::Queue::null();
            self.compute_queue = vk::Queue::null();
            self.transfer_queue = vk::Queue::null();

            self.logical.destroy_device(None);
        }
        self.physical.swapchain_support = SwapchainSupportInfo::default();
        log::info!("Logical device destroyed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_support(supported: &[vk::Format]) -> impl Fn(vk::Format) -> vk::FormatProperties + '_ {
        move |format| {
            if supported.contains(&format) {
                vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties::default()
            }
        }
    }

    #[test]
    fn test_depth_format_priority() {
        let all = DEPTH_FORMAT_CANDIDATES;
        assert_eq!(choose_depth_format(depth_support(&all)), Some(vk::Format::D32_SFLOAT));

        let no_pure = [vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT_S8_UINT];
        assert_eq!(choose_depth_format(depth_support(&no_pure)), Some(vk::Format::D32_SFLOAT_S8_UINT));

        let only_24 = [vk::Format::D24_UNORM_S8_UINT];
        assert_eq!(choose_depth_format(depth_support(&only_24)), Some(vk::Format::D24_UNORM_S8_UINT));

        assert_eq!(choose_depth_format(depth_support(&[])), None);
    }

    #[test]
    fn test_linear_tiling_support_counts() {
        let format = choose_depth_format(|format| {
            if format == vk::Format::D32_SFLOAT_S8_UINT {
                vk::FormatProperties {
                    linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties::default()
            }
        });
        assert_eq!(format, Some(vk::Format::D32_SFLOAT_S8_UINT));
    }

    #[test]
    fn test_find_memory_type() {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        properties.memory_types[0].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        properties.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        properties.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;

        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(find_memory_type(&properties, 0b111, local), Some(1));
        assert_eq!(find_memory_type(&properties, 0b100, local), Some(2));
        assert_eq!(find_memory_type(&properties, 0b001, local), None);
    }
}
