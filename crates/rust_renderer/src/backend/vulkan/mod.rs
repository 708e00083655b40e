//! # Vulkan Backend
//!
//! Vulkan implementation of the render backend: device selection, swapchain
//! lifecycle, command buffers, synchronisation, the main render pass and its
//! framebuffers, and the per-frame loop that ties them together.
//!
//! Decision logic (device scoring, surface format and extent choice, result
//! classification, command buffer transitions) lives in plain functions so it
//! can be exercised without a GPU.

pub mod command_buffer;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod render_pass;
pub mod swapchain;
pub mod sync;

pub use command_buffer::{CommandBuffer, CommandBufferOp, CommandBufferState};
pub use context::{ResizeState, VulkanContext};
pub use device::VulkanDevice;
pub use error::{check, VulkanError, VulkanResult};
pub use frame::VulkanBackend;
pub use framebuffer::FrameBuffer;
pub use image::{Image, ImageDescriptor};
pub use instance::VulkanInstance;
pub use physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, RejectReason, SelectedCandidate, SwapchainSupportInfo};
pub use render_pass::{ClearValues, RenderPass, RenderPassState};
pub use swapchain::{Swapchain, SwapchainSettings, MAX_FRAMES_IN_FLIGHT};
pub use sync::Fence;
