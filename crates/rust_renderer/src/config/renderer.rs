//! # Renderer Configuration
//!
//! Settings consumed by the Vulkan backend at initialization: application
//! metadata, validation, device requirements and the main render pass clear
//! values.

use serde::{Deserialize, Serialize};

use super::Config;

/// Name of the device extension every presenting device must expose
pub const SWAPCHAIN_EXTENSION_NAME: &str = "VK_KHR_swapchain";

/// Capabilities a physical device must offer to be selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceRequirements {
    /// Require a queue family with graphics support
    pub graphics: bool,
    /// Require a queue family able to present to the surface
    pub present: bool,
    /// Require a queue family with compute support
    pub compute: bool,
    /// Require a queue family with transfer support
    pub transfer: bool,
    /// Device extensions that must all be available
    pub device_extension_names: Vec<String>,
    /// Require anisotropic sampling
    pub sampler_anisotropy: bool,
    /// Only accept discrete GPUs
    pub discrete_gpu: bool,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            graphics: true,
            present: true,
            compute: false,
            transfer: true,
            device_extension_names: vec![SWAPCHAIN_EXTENSION_NAME.to_string()],
            sampler_anisotropy: true,
            discrete_gpu: false,
        }
    }
}

/// # Vulkan Renderer Configuration
///
/// Configuration specific to the Vulkan rendering backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Whether to enable Vulkan validation layers
    pub enable_validation: Option<bool>,
    /// Physical device requirements
    pub device: DeviceRequirements,
    /// RGBA clear colour of the main render pass
    pub clear_color: [f32; 4],
    /// Depth clear value of the main render pass
    pub clear_depth: f32,
    /// Stencil clear value of the main render pass
    pub clear_stencil: u32,
    /// Timeout for in-flight fence waits and image acquisition, in nanoseconds.
    /// `None` waits indefinitely.
    pub frame_timeout_ns: Option<u64>,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set application version
    pub const fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Enable or disable validation layers
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set device requirements
    pub fn with_device_requirements(mut self, requirements: DeviceRequirements) -> Self {
        self.device = requirements;
        self
    }

    /// Set the main render pass clear colour
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Frame timeout in nanoseconds, `u64::MAX` when unbounded
    pub fn frame_timeout(&self) -> u64 {
        self.frame_timeout_ns.unwrap_or(u64::MAX)
    }

    /// Whether validation layers should be enabled for this build
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Rust Renderer Application".to_string(),
            application_version: (1, 0, 0),
            enable_validation: None,
            device: DeviceRequirements::default(),
            clear_color: [0.0, 0.0, 0.2, 1.0],
            clear_depth: 1.0,
            clear_stencil: 0,
            frame_timeout_ns: None,
        }
    }
}

impl Config for RendererConfig {}
