//! # Rust Renderer
//!
//! Vulkan rendering backend for the engine. It owns the graphics device, the
//! presentable image chain, command recording and the host/GPU synchronization
//! needed to draw and display one frame at a time.
//!
//! ## Features
//!
//! - **Device Selection**: Queue-family scoring against a requirements record
//! - **Swapchain Lifecycle**: Negotiation, depth attachment, in-place recreation
//! - **Recording State Machines**: Command buffers, fences and render passes
//! - **Frame Orchestration**: Acquire, record, submit and present with two frames in flight
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_renderer::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     rust_renderer::foundation::logging::init();
//!
//!     let mut window = Window::new("demo", 1280, 720)?;
//!     let mut backend = VulkanBackend::new(RendererConfig::new("demo"));
//!     backend.initialize("demo", &mut window)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         backend.draw_frame(&RenderPacket { delta_time: 1.0 / 60.0 })?;
//!     }
//!
//!     backend.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod backend;
pub mod config;
pub mod foundation;
pub mod platform;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        backend::{
            create_backend, BackendError, BackendResult, BackendType, RenderBackend, RenderPacket,
            vulkan::{VulkanBackend, VulkanError, VulkanResult},
        },
        config::{Config, ConfigError, DeviceRequirements, RendererConfig},
        platform::{PlatformSurface, Window, WindowError},
    };
}
