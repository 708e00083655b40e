//! Physical device selection
//!
//! Candidates are described as plain data ([`PhysicalDeviceCandidate`]) so the
//! selection rules can be evaluated without a driver. [`PhysicalDeviceInfo`]
//! gathers those descriptions from the instance and keeps the cached
//! properties of the device that was picked.

use std::ffi::CStr;
use std::os::raw::c_char;

use ash::extensions::khr::Surface;
use ash::{vk, Instance};
use thiserror::Error;

use super::error::{check, VulkanError, VulkanResult};
use crate::config::DeviceRequirements;

/// Queue family assignment for a device; `None` marks an unassigned family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics work
    pub graphics: Option<u32>,
    /// Family used for presentation
    pub present: Option<u32>,
    /// Family used for compute work
    pub compute: Option<u32>,
    /// Family used for transfers, preferring the most dedicated one
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Whether every required family ended up assigned
    pub const fn satisfies(&self, requirements: &DeviceRequirements) -> bool {
        (!requirements.graphics || self.graphics.is_some())
            && (!requirements.present || self.present.is_some())
            && (!requirements.compute || self.compute.is_some())
            && (!requirements.transfer || self.transfer.is_some())
    }

    /// Assigned family indices without duplicates, in ascending order
    pub fn unique(&self) -> Vec<u32> {
        let mut families: Vec<u32> = [self.graphics, self.present, self.compute, self.transfer]
            .into_iter()
            .flatten()
            .collect();
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Surface support of a device: capabilities, formats and present modes
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportInfo {
    /// Surface capabilities
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportInfo {
    /// Query the surface support of a physical device
    pub fn query(
        surface_loader: &Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<Self> {
        unsafe {
            let capabilities = check(
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface),
                "vkGetPhysicalDeviceSurfaceCapabilitiesKHR",
            )?;
            let formats = check(
                surface_loader.get_physical_device_surface_formats(physical_device, surface),
                "vkGetPhysicalDeviceSurfaceFormatsKHR",
            )?;
            let present_modes = check(
                surface_loader.get_physical_device_surface_present_modes(physical_device, surface),
                "vkGetPhysicalDeviceSurfacePresentModesKHR",
            )?;

            Ok(Self {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

/// One queue family as seen by the selector
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyCandidate {
    /// Operations supported by the family
    pub flags: vk::QueueFlags,
    /// Whether the family can present to the surface
    pub supports_present: bool,
}

/// Everything the selector needs to know about a physical device
#[derive(Debug, Clone, Default)]
pub struct PhysicalDeviceCandidate {
    /// Device name reported by the driver
    pub name: String,
    /// Integrated, discrete, virtual...
    pub device_type: vk::PhysicalDeviceType,
    /// Queue families in index order
    pub queue_families: Vec<QueueFamilyCandidate>,
    /// Names of the available device extensions
    pub extensions: Vec<String>,
    /// Whether anisotropic sampling is supported
    pub supports_sampler_anisotropy: bool,
}

/// Candidate that passed every check
#[derive(Debug, Clone)]
pub struct SelectedCandidate {
    /// Position in the enumeration order
    pub index: usize,
    /// Queue family assignment
    pub queue_families: QueueFamilyIndices,
    /// Surface support queried during evaluation
    pub swapchain_support: SwapchainSupportInfo,
}

/// Why a candidate device was not selected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Discrete GPU required
    #[error("device is not a discrete GPU")]
    NotDiscrete,
    /// A required queue family could not be assigned
    #[error("required queue families missing ({0:?})")]
    MissingQueueFamilies(QueueFamilyIndices),
    /// Querying surface support failed
    #[error("surface support query failed: {0}")]
    SurfaceQueryFailed(String),
    /// No surface formats or no present modes
    #[error("swapchain support is incomplete")]
    InadequateSwapchainSupport,
    /// A required device extension is absent
    #[error("required extension '{0}' is not available")]
    MissingExtension(String),
    /// Anisotropic sampling required but unsupported
    #[error("sampler anisotropy is not supported")]
    NoSamplerAnisotropy,
}

/// Assign queue families in a single pass.
///
/// Graphics, compute and present take the first family offering them. The
/// transfer family is the one that supports the fewest of graphics/compute,
/// the first such family winning ties.
pub fn assign_queue_families(families: &[QueueFamilyCandidate]) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    let mut min_transfer_score = u8::MAX;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let mut transfer_score = 0u8;

        if family.flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics.get_or_insert(index);
            transfer_score += 1;
        }

        if family.flags.contains(vk::QueueFlags::COMPUTE) {
            indices.compute.get_or_insert(index);
            transfer_score += 1;
        }

        if family.flags.contains(vk::QueueFlags::TRANSFER) && transfer_score < min_transfer_score {
            min_transfer_score = transfer_score;
            indices.transfer = Some(index);
        }

        if family.supports_present {
            indices.present.get_or_insert(index);
        }
    }

    indices
}

/// Check one candidate against the requirements.
///
/// Surface support is only queried once the queue families are known to be
/// sufficient.
pub fn evaluate_candidate<F>(
    candidate: &PhysicalDeviceCandidate,
    requirements: &DeviceRequirements,
    query_support: F,
) -> Result<(QueueFamilyIndices, SwapchainSupportInfo), RejectReason>
where
    F: FnOnce() -> VulkanResult<SwapchainSupportInfo>,
{
    if requirements.discrete_gpu && candidate.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        return Err(RejectReason::NotDiscrete);
    }

    let indices = assign_queue_families(&candidate.queue_families);
    if !indices.satisfies(requirements) {
        return Err(RejectReason::MissingQueueFamilies(indices));
    }

    let support = query_support().map_err(|err| RejectReason::SurfaceQueryFailed(err.to_string()))?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Err(RejectReason::InadequateSwapchainSupport);
    }

    if let Some(missing) = requirements
        .device_extension_names
        .iter()
        .find(|required| !candidate.extensions.contains(required))
    {
        return Err(RejectReason::MissingExtension(missing.clone()));
    }

    if requirements.sampler_anisotropy && !candidate.supports_sampler_anisotropy {
        return Err(RejectReason::NoSamplerAnisotropy);
    }

    Ok((indices, support))
}

/// Pick the first candidate, in enumeration order, that meets the requirements.
///
/// `query_support` is called with a candidate's index when its surface
/// support is needed.
pub fn select_candidate<F>(
    candidates: &[PhysicalDeviceCandidate],
    requirements: &DeviceRequirements,
    mut query_support: F,
) -> Option<SelectedCandidate>
where
    F: FnMut(usize) -> VulkanResult<SwapchainSupportInfo>,
{
    candidates.iter().enumerate().find_map(|(index, candidate)| {
        match evaluate_candidate(candidate, requirements, || query_support(index)) {
            Ok((queue_families, swapchain_support)) => Some(SelectedCandidate {
                index,
                queue_families,
                swapchain_support,
            }),
            Err(reason) => {
                log::info!("Skipping device '{}': {}", candidate.name, reason);
                None
            }
        }
    })
}

/// Physical device selection and cached capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family assignment
    pub queue_families: QueueFamilyIndices,
    /// Surface support, re-queried whenever the swapchain is rebuilt
    pub swapchain_support: SwapchainSupportInfo,
}

impl PhysicalDeviceInfo {
    /// Select a suitable physical device for rendering
    pub fn select(
        instance: &Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        requirements: &DeviceRequirements,
    ) -> VulkanResult<Self> {
        let devices = check(unsafe { instance.enumerate_physical_devices() }, "vkEnumeratePhysicalDevices")?;
        if devices.is_empty() {
            log::error!("No devices which support Vulkan were found");
            return Err(VulkanError::NoSuitableDevice);
        }

        let mut handles = Vec::with_capacity(devices.len());
        let mut candidates = Vec::with_capacity(devices.len());
        for &device in &devices {
            match Self::describe(instance, surface_loader, surface, device) {
                Ok(candidate) => {
                    handles.push(device);
                    candidates.push(candidate);
                }
                Err(err) => log::warn!("Skipping device {:?}: could not be described ({})", device, err),
            }
        }

        let selected = select_candidate(&candidates, requirements, |index| {
            SwapchainSupportInfo::query(surface_loader, handles[index], surface)
        });
        let Some(SelectedCandidate {
            index,
            queue_families,
            swapchain_support,
        }) = selected
        else {
            log::error!("No physical device met the renderer requirements");
            return Err(VulkanError::NoSuitableDevice);
        };

        let device = handles[index];
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let candidate = &candidates[index];

        log::info!("Selected device: '{}' ({:?})", candidate.name, candidate.device_type);
        log::info!(
            "GPU driver version: {}.{}.{}",
            vk::api_version_major(properties.driver_version),
            vk::api_version_minor(properties.driver_version),
            vk::api_version_patch(properties.driver_version)
        );
        log::info!(
            "Vulkan API version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={:?} present={:?} compute={:?} transfer={:?}",
            queue_families.graphics,
            queue_families.present,
            queue_families.compute,
            queue_families.transfer
        );

        Ok(Self {
            device,
            properties,
            features,
            memory_properties,
            queue_families,
            swapchain_support,
        })
    }

    /// Gather the selector's view of a device
    fn describe(
        instance: &Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> VulkanResult<PhysicalDeviceCandidate> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) }
            .iter()
            .enumerate()
            .map(|(index, family)| {
                let supports_present = check(
                    unsafe { surface_loader.get_physical_device_surface_support(device, index as u32, surface) },
                    "vkGetPhysicalDeviceSurfaceSupportKHR",
                )?;
                Ok(QueueFamilyCandidate {
                    flags: family.queue_flags,
                    supports_present,
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let extensions = check(
            unsafe { instance.enumerate_device_extension_properties(device) },
            "vkEnumerateDeviceExtensionProperties",
        )?
        .iter()
        .map(|extension| c_name(&extension.extension_name))
        .collect();

        Ok(PhysicalDeviceCandidate {
            name: c_name(&properties.device_name),
            device_type: properties.device_type,
            queue_families,
            extensions,
            supports_sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        })
    }
}

/// Convert a fixed-size, NUL-terminated driver string
fn c_name(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SWAPCHAIN_EXTENSION_NAME;

    fn family(flags: vk::QueueFlags, supports_present: bool) -> QueueFamilyCandidate {
        QueueFamilyCandidate { flags, supports_present }
    }

    fn surface_support() -> SwapchainSupportInfo {
        SwapchainSupportInfo {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    fn device(name: &str, device_type: vk::PhysicalDeviceType) -> PhysicalDeviceCandidate {
        PhysicalDeviceCandidate {
            name: name.to_string(),
            device_type,
            queue_families: vec![family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                true,
            )],
            extensions: vec![SWAPCHAIN_EXTENSION_NAME.to_string()],
            supports_sampler_anisotropy: true,
        }
    }

    fn with_support(
        support: SwapchainSupportInfo,
    ) -> impl FnOnce() -> VulkanResult<SwapchainSupportInfo> {
        move || Ok(support)
    }

    fn evaluate(
        candidate: &PhysicalDeviceCandidate,
        requirements: &DeviceRequirements,
    ) -> Result<QueueFamilyIndices, RejectReason> {
        evaluate_candidate(candidate, requirements, with_support(surface_support())).map(|(indices, _)| indices)
    }

    fn select(candidates: &[PhysicalDeviceCandidate], requirements: &DeviceRequirements) -> Option<usize> {
        select_candidate(candidates, requirements, |_| Ok(surface_support())).map(|selected| selected.index)
    }

    #[test]
    fn test_transfer_prefers_dedicated_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
            family(vk::QueueFlags::TRANSFER, false),
            family(vk::QueueFlags::TRANSFER, true),
        ];

        let indices = assign_queue_families(&families);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.compute, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.transfer, Some(2));
    }

    #[test]
    fn test_present_family_can_differ_from_graphics() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, false),
            family(vk::QueueFlags::COMPUTE, true),
        ];

        let indices = assign_queue_families(&families);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.compute, Some(1));
        assert_eq!(indices.transfer, Some(0));
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn test_selects_first_passing_device_in_order() {
        let mut no_present = device("headless", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_present.queue_families = vec![family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, false)];
        let candidates = [
            no_present,
            device("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            device("discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];

        let selected = select_candidate(&candidates, &DeviceRequirements::default(), |_| Ok(surface_support())).unwrap();
        assert_eq!(selected.index, 1);
        assert_eq!(selected.queue_families.graphics, Some(0));

        // Deterministic for a fixed order
        assert_eq!(select(&candidates, &DeviceRequirements::default()), Some(1));
    }

    #[test]
    fn test_discrete_requirement_without_discrete_gpu_fails() {
        let candidates = [
            device("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            device("cpu", vk::PhysicalDeviceType::CPU),
        ];
        let requirements = DeviceRequirements {
            discrete_gpu: true,
            ..DeviceRequirements::default()
        };

        assert!(select(&candidates, &requirements).is_none());
        assert_eq!(evaluate(&candidates[0], &requirements), Err(RejectReason::NotDiscrete));
    }

    #[test]
    fn test_required_compute_family_must_be_assigned() {
        let mut candidate = device("graphics only", vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.queue_families = vec![family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, true)];

        let requirements = DeviceRequirements {
            compute: true,
            ..DeviceRequirements::default()
        };
        assert!(matches!(
            evaluate(&candidate, &requirements),
            Err(RejectReason::MissingQueueFamilies(QueueFamilyIndices { compute: None, .. }))
        ));
        assert!(evaluate(&candidate, &DeviceRequirements::default()).is_ok());
    }

    #[test]
    fn test_rejects_incomplete_surface_support() {
        let candidate = device("surface", vk::PhysicalDeviceType::DISCRETE_GPU);

        let mut no_formats = surface_support();
        no_formats.formats.clear();
        assert!(matches!(
            evaluate_candidate(&candidate, &DeviceRequirements::default(), with_support(no_formats)),
            Err(RejectReason::InadequateSwapchainSupport)
        ));

        let mut no_modes = surface_support();
        no_modes.present_modes.clear();
        assert!(matches!(
            evaluate_candidate(&candidate, &DeviceRequirements::default(), with_support(no_modes)),
            Err(RejectReason::InadequateSwapchainSupport)
        ));
    }

    #[test]
    fn test_rejects_missing_extension_and_anisotropy() {
        let mut candidate = device("no swapchain", vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.extensions.clear();
        assert_eq!(
            evaluate(&candidate, &DeviceRequirements::default()),
            Err(RejectReason::MissingExtension(SWAPCHAIN_EXTENSION_NAME.to_string()))
        );

        let mut candidate = device("no anisotropy", vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.supports_sampler_anisotropy = false;
        assert_eq!(
            evaluate(&candidate, &DeviceRequirements::default()),
            Err(RejectReason::NoSamplerAnisotropy)
        );

        let relaxed = DeviceRequirements {
            sampler_anisotropy: false,
            ..DeviceRequirements::default()
        };
        assert!(evaluate(&candidate, &relaxed).is_ok());
    }

    #[test]
    fn test_failed_surface_query_skips_only_that_device() {
        let candidates = [
            device("lost surface", vk::PhysicalDeviceType::DISCRETE_GPU),
            device("working", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ];

        let selected = select_candidate(&candidates, &DeviceRequirements::default(), |index| {
            if index == 0 {
                Err(VulkanError::SurfaceLost)
            } else {
                Ok(surface_support())
            }
        })
        .unwrap();
        assert_eq!(selected.index, 1);
        assert_eq!(selected.swapchain_support.present_modes, vec![vk::PresentModeKHR::FIFO]);

        assert!(matches!(
            evaluate_candidate(&candidates[0], &DeviceRequirements::default(), || Err(VulkanError::SurfaceLost)),
            Err(RejectReason::SurfaceQueryFailed(_))
        ));
    }

    #[test]
    fn test_surface_queried_only_after_queue_families_pass() {
        let mut no_present = device("no present", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_present.queue_families = vec![family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, false)];
        let candidates = [no_present, device("good", vk::PhysicalDeviceType::DISCRETE_GPU)];

        let mut queried = Vec::new();
        let selected = select_candidate(&candidates, &DeviceRequirements::default(), |index| {
            queried.push(index);
            Ok(surface_support())
        });

        assert_eq!(selected.map(|selected| selected.index), Some(1));
        assert_eq!(queried, vec![1]);
    }
}
