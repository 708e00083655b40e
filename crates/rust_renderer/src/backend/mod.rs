//! # Backend Module
//!
//! Graphics backend abstraction and its Vulkan implementation.
//!
//! The engine loop talks to a [`RenderBackend`]: it initializes it against a
//! platform handle, forwards window resizes, and asks it to draw one frame per
//! tick. Only Vulkan is implemented; [`BackendType`] keeps the seam for others
//! without paying for dynamic dispatch.

pub mod vulkan;

use thiserror::Error;

use crate::config::RendererConfig;
use crate::platform::PlatformSurface;

use self::vulkan::{VulkanBackend, VulkanError};

/// Graphics APIs a backend can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    /// Vulkan 1.0+
    Vulkan,
    /// OpenGL (not implemented)
    OpenGl,
    /// DirectX (not implemented)
    DirectX,
}

/// Backend-level errors
#[derive(Error, Debug)]
pub enum BackendError {
    /// The requested graphics API has no implementation
    #[error("Unsupported renderer backend: {0:?}")]
    UnsupportedBackend(BackendType),

    /// Error raised by the Vulkan backend
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

impl BackendError {
    /// Whether the backend can no longer be used
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnsupportedBackend(_) => true,
            Self::Vulkan(err) => err.is_fatal(),
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Per-frame data handed to the backend
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderPacket {
    /// Seconds elapsed since the previous frame
    pub delta_time: f32,
}

/// # Render Backend Trait
///
/// Defines the interface the engine loop drives every frame.
pub trait RenderBackend {
    /// Initialize the backend against a platform window.
    ///
    /// Calling this on an already initialized backend succeeds without
    /// doing anything.
    fn initialize(&mut self, app_name: &str, platform: &mut dyn PlatformSurface) -> BackendResult<()>;

    /// Release every GPU resource. Safe to call more than once.
    fn shutdown(&mut self);

    /// Notify the backend that the window framebuffer changed size
    fn on_window_resize(&mut self, width: u32, height: u32);

    /// Prepare a frame for recording.
    ///
    /// Returns `Ok(false)` when the frame must be skipped, for instance while
    /// the swapchain is being recreated.
    fn begin_frame(&mut self, delta_time: f32) -> BackendResult<bool>;

    /// Submit and present the frame started by [`RenderBackend::begin_frame`]
    fn end_frame(&mut self, delta_time: f32) -> BackendResult<()>;

    /// Number of frames submitted so far
    fn frame_number(&self) -> u64;

    /// Run one full frame
    fn draw_frame(&mut self, packet: &RenderPacket) -> BackendResult<()> {
        if self.begin_frame(packet.delta_time)? {
            self.end_frame(packet.delta_time)?;
        }
        Ok(())
    }
}

/// Create the backend for a graphics API
pub fn create_backend(backend_type: BackendType, config: RendererConfig) -> BackendResult<VulkanBackend> {
    match backend_type {
        BackendType::Vulkan => Ok(VulkanBackend::new(config)),
        other => {
            log::error!("Renderer backend {:?} is not implemented", other);
            Err(BackendError::UnsupportedBackend(other))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_vulkan_backend_is_constructible() {
        assert!(create_backend(BackendType::Vulkan, RendererConfig::default()).is_ok());
        assert!(matches!(
            create_backend(BackendType::OpenGl, RendererConfig::default()),
            Err(BackendError::UnsupportedBackend(BackendType::OpenGl))
        ));
        assert!(matches!(
            create_backend(BackendType::DirectX, RendererConfig::default()),
            Err(BackendError::UnsupportedBackend(BackendType::DirectX))
        ));
    }

    #[test]
    fn test_unsupported_backend_is_fatal() {
        assert!(BackendError::UnsupportedBackend(BackendType::DirectX).is_fatal());
        assert!(!BackendError::Vulkan(VulkanError::Timeout).is_fatal());
    }
}
