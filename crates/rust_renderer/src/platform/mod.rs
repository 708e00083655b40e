//! # Platform Layer
//!
//! The renderer never talks to the windowing system directly. Everything it
//! needs from the platform (framebuffer size, the instance extensions required
//! for presentation, and the surface itself) goes through [`PlatformSurface`].

use ash::vk;

mod window;

pub use window::{Window, WindowError, WindowResult};

/// Platform handle consumed by the renderer backend
pub trait PlatformSurface {
    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);

    /// Instance extensions the platform needs to present to its windows
    fn required_instance_extensions(&self) -> WindowResult<Vec<String>>;

    /// Create a presentation surface for the window
    fn create_surface(&mut self, entry: &ash::Entry, instance: &ash::Instance) -> WindowResult<vk::SurfaceKHR>;
}
