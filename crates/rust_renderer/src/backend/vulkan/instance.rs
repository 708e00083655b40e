//! Vulkan instance creation
//!
//! Loads the Vulkan entry point, creates the instance with the platform's
//! presentation extensions and, when validation is on, the Khronos validation
//! layer plus a debug messenger that forwards driver messages to `log`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry, Instance};

use super::error::{check, VulkanError, VulkanResult};
use crate::config::RendererConfig;
use crate::platform::PlatformSurface;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &str = "Rust Renderer";

/// Vulkan entry, instance and optional debug messenger
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance for the platform
    pub fn new(config: &RendererConfig, app_name: &str, platform: &dyn PlatformSurface) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {}", e)))?;

        let app_name = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {}", e)))?;
        let engine_name = CString::new(ENGINE_NAME)
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let validation = config.validation_enabled();

        let mut extension_names = platform.required_instance_extensions()?;
        if validation {
            extension_names.push(DebugUtils::name().to_string_lossy().into_owned());
        }
        log::debug!("Required instance extensions: {:?}", extension_names);
        let extension_names = to_c_strings(&extension_names)?;
        let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();

        let layer_names = if validation {
            log::info!("Validation layers enabled. Enumerating...");
            ensure_layers_available(&entry, &[VALIDATION_LAYER])?;
            to_c_strings(&[VALIDATION_LAYER.to_string()])?
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = check(unsafe { entry.create_instance(&create_info, None) }, "vkCreateInstance")?;
        log::info!("Vulkan instance created.");

        let mut vulkan_instance = Self {
            entry,
            instance,
            debug: None,
        };

        if validation {
            let debug_utils = DebugUtils::new(&vulkan_instance.entry, &vulkan_instance.instance);
            match create_debug_messenger(&debug_utils) {
                Ok(messenger) => vulkan_instance.debug = Some((debug_utils, messenger)),
                Err(err) => {
                    vulkan_instance.destroy();
                    return Err(err);
                }
            }
            log::debug!("Vulkan debugger created.");
        }

        Ok(vulkan_instance)
    }

    /// Destroy the debug messenger and the instance
    pub fn destroy(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                log::debug!("Destroying Vulkan debugger...");
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            log::debug!("Destroying Vulkan instance...");
            self.instance.destroy_instance(None);
        }
    }
}

fn to_c_strings(names: &[String]) -> VulkanResult<Vec<CString>> {
    names
        .iter()
        .map(|name| CString::new(name.as_str()))
        .collect::<Result<_, _>>()
        .map_err(|e| VulkanError::InitializationFailed(format!("Invalid name: {}", e)))
}

fn ensure_layers_available(entry: &Entry, required: &[&str]) -> VulkanResult<()> {
    #[allow(unused_unsafe)]
    let available = check(
        unsafe { entry.enumerate_instance_layer_properties() },
        "vkEnumerateInstanceLayerProperties",
    )?;

    for &layer in required {
        log::info!("Searching for layer: {}...", layer);
        let found = available.iter().any(|properties| {
            let name = unsafe { CStr::from_ptr(properties.layer_name.as_ptr()) };
            name.to_str() == Ok(layer)
        });

        if !found {
            log::error!("Required validation layer is missing: {}", layer);
            return Err(VulkanError::InitializationFailed(format!("missing layer {}", layer)));
        }
    }

    log::info!("All required validation layers are present.");
    Ok(())
}

fn create_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    check(
        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) },
        "vkCreateDebugUtilsMessengerEXT",
    )
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::info!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::trace!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}
