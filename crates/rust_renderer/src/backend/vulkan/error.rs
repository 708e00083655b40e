//! Vulkan error types
//!
//! Every graphics API call goes through [`check`], which logs the failing call
//! and its result code and turns the code into a [`VulkanError`]. Timeouts and
//! out-of-date swapchains stay recoverable; device loss and memory exhaustion
//! do not.

use ash::vk;
use thiserror::Error;

use crate::platform::WindowError;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("{call} failed: {result:?}")]
    Api {
        /// Name of the failing call
        call: &'static str,
        /// Result code returned by the driver
        result: vk::Result,
    },

    /// The logical device was lost
    #[error("Device lost")]
    DeviceLost,

    /// Host or device memory was exhausted
    #[error("Out of memory")]
    OutOfMemory,

    /// The presentation surface is no longer available
    #[error("Surface lost")]
    SurfaceLost,

    /// A wait did not complete in time
    #[error("Timed out")]
    Timeout,

    /// The swapchain no longer matches the surface
    #[error("Swapchain out of date")]
    OutOfDate,

    /// A required capability is not available
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// No physical device satisfied the requirements
    #[error("No suitable physical device found")]
    NoSuitableDevice,

    /// Operation attempted from a state that does not allow it
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the object was in
        state: String,
    },

    /// The backend has not been initialized
    #[error("Backend not initialized")]
    NotInitialized,

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// A swapchain rebuild failed partway; frame resources are missing
    #[error("Swapchain resources are incomplete after a failed rebuild")]
    SwapchainIncomplete,

    /// A failure that left per-frame state unusable
    #[error("{operation} failed and cannot be retried: {source}")]
    Unrecoverable {
        /// What was being done
        operation: &'static str,
        /// Underlying failure
        source: Box<VulkanError>,
    },

    /// Platform window error
    #[error("Window error: {0}")]
    Window(#[from] WindowError),
}

impl VulkanError {
    /// Map a failing result code to an error
    pub fn from_result(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfMemory,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::TIMEOUT => Self::Timeout,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            result => Self::Api { call, result },
        }
    }

    /// Whether the caller may retry the operation
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::OutOfDate)
    }

    /// Whether the renderer cannot continue after this error
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost
                | Self::OutOfMemory
                | Self::SurfaceLost
                | Self::NoSuitableDevice
                | Self::InitializationFailed(_)
                | Self::SwapchainIncomplete
                | Self::Unrecoverable { .. }
        )
    }

    /// Escalate to a fatal error when `operation` leaves no way to retry
    #[must_use]
    pub fn into_fatal(self, operation: &'static str) -> Self {
        if self.is_fatal() {
            self
        } else {
            Self::Unrecoverable {
                operation,
                source: Box::new(self),
            }
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Check the result of a graphics API call.
///
/// Failures are logged with the call name and the result code.
pub fn check<T>(result: Result<T, vk::Result>, call: &'static str) -> VulkanResult<T> {
    result.map_err(|code| {
        log::error!("{} failed with {:?}", call, code);
        VulkanError::from_result(call, code)
    })
}
