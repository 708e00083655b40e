//! Per-frame orchestration
//!
//! A frame runs as: wait for the frame's fence, acquire an image, record the
//! image's command buffer inside the main render pass, submit, present. The
//! [`VulkanBackend`] wraps a [`VulkanContext`] and exposes that protocol
//! through [`RenderBackend`].

use ash::vk;

use super::context::VulkanContext;
use super::error::{check, VulkanError, VulkanResult};
use super::swapchain::MAX_FRAMES_IN_FLIGHT;
use crate::backend::{BackendResult, RenderBackend};
use crate::config::RendererConfig;
use crate::platform::PlatformSurface;

/// Frame slot following `current`
pub const fn next_frame_index(current: usize) -> usize {
    (current + 1) % MAX_FRAMES_IN_FLIGHT
}

/// Viewport covering the whole extent with a 0..1 depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Frame slot whose fence must be waited on before `image` is recorded into
/// again by `frame`, if any
pub fn pending_image_owner(images_in_flight: &[Option<usize>], image: usize, frame: usize) -> Option<usize> {
    images_in_flight
        .get(image)
        .copied()
        .flatten()
        .filter(|&owner| owner != frame)
}

impl VulkanContext {
    /// Prepare the next frame. `Ok(false)` means skip it.
    pub fn begin_frame(&mut self) -> VulkanResult<bool> {
        if self.recreating_swapchain {
            log::error!("Cannot begin a frame: the last swapchain rebuild failed");
            return Err(VulkanError::SwapchainIncomplete);
        }

        if self.resize.is_pending() {
            if self.recreate_swapchain()? {
                log::info!("Resized, booting.");
            }
            return Ok(false);
        }

        let frame = self.current_frame;
        match self.in_flight_fences[frame].wait(&self.device.logical, self.frame_timeout_ns) {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => {
                log::warn!("In-flight fence wait failure: {}", err);
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        let image_available = self.image_available_semaphores[frame];
        let Some(image_index) = self.acquire_next_image(self.frame_timeout_ns, image_available, vk::Fence::null())? else {
            return Ok(false);
        };
        self.image_index = image_index;
        let image = image_index as usize;

        let logical = &self.device.logical;

        // The image's command buffer may still be pending for another frame.
        if let Some(owner) = pending_image_owner(&self.images_in_flight, image, frame) {
            self.in_flight_fences[owner].wait(logical, u64::MAX)?;
        }

        let (Some(command_buffer), Some(framebuffer), Some(in_flight)) = (
            self.graphics_command_buffers.get_mut(image),
            self.framebuffers.get(image),
            self.images_in_flight.get_mut(image),
        ) else {
            log::error!("No frame resources for swapchain image {}", image_index);
            return Err(VulkanError::SwapchainIncomplete);
        };
        *in_flight = Some(frame);

        let extent = self.swapchain.extent();
        command_buffer.reset()?;
        command_buffer.begin(logical, false, false, false)?;

        let viewport = full_viewport(extent);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            logical.cmd_set_viewport(command_buffer.handle(), 0, &[viewport]);
            logical.cmd_set_scissor(command_buffer.handle(), 0, &[scissor]);
        }

        self.main_render_pass.begin(logical, command_buffer, framebuffer)?;
        Ok(true)
    }

    /// Finish recording, submit and present the frame started by
    /// [`VulkanContext::begin_frame`]
    pub fn end_frame(&mut self) -> VulkanResult<()> {
        let frame = self.current_frame;
        let logical = &self.device.logical;

        let command_buffer = self
            .graphics_command_buffers
            .get_mut(self.image_index as usize)
            .ok_or(VulkanError::SwapchainIncomplete)?;
        self.main_render_pass.end(logical, command_buffer)?;
        command_buffer.end(logical)?;

        self.in_flight_fences[frame].reset(logical)?;

        let command_buffers = [command_buffer.handle()];
        let wait_semaphores = [self.image_available_semaphores[frame]];
        let signal_semaphores = [self.queue_complete_semaphores[frame]];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .build();

        // The fence is reset and nothing will signal it if the submit fails.
        check(
            unsafe {
                logical.queue_submit(
                    self.device.graphics_queue,
                    &[submit_info],
                    self.in_flight_fences[frame].handle(),
                )
            },
            "vkQueueSubmit",
        )
        .map_err(|err| err.into_fatal("frame submission"))?;
        command_buffer.update_submitted()?;

        if let Err(err) = self.present(signal_semaphores[0], self.image_index) {
            log::error!("Failed to present swapchain image {}: {}", self.image_index, err);
            return Err(err);
        }
        Ok(())
    }
}

/// Vulkan implementation of [`RenderBackend`]
pub struct VulkanBackend {
    config: RendererConfig,
    context: Option<VulkanContext>,
    frame_number: u64,
}

impl VulkanBackend {
    /// Create an uninitialized backend
    pub const fn new(config: RendererConfig) -> Self {
        Self {
            config,
            context: None,
            frame_number: 0,
        }
    }

    /// Whether [`RenderBackend::initialize`] has succeeded
    pub const fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Renderer configuration
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Live context, if initialized
    pub const fn context(&self) -> Option<&VulkanContext> {
        self.context.as_ref()
    }

    fn context_mut(&mut self) -> VulkanResult<&mut VulkanContext> {
        self.context.as_mut().ok_or(VulkanError::NotInitialized)
    }
}

impl RenderBackend for VulkanBackend {
    fn initialize(&mut self, app_name: &str, platform: &mut dyn PlatformSurface) -> BackendResult<()> {
        if self.context.is_some() {
            log::info!("Vulkan backend already initialized");
            return Ok(());
        }

        self.context = Some(VulkanContext::new(&self.config, app_name, platform)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.shutdown();
        }
    }

    fn on_window_resize(&mut self, width: u32, height: u32) {
        match self.context.as_mut() {
            Some(context) => context.on_resize(width, height),
            None => log::warn!("Window resized to {}x{} before the backend was initialized", width, height),
        }
    }

    fn begin_frame(&mut self, _delta_time: f32) -> BackendResult<bool> {
        Ok(self.context_mut()?.begin_frame()?)
    }

    fn end_frame(&mut self, _delta_time: f32) -> BackendResult<()> {
        self.context_mut()?.end_frame()?;
        self.frame_number += 1;
        Ok(())
    }

    fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, RenderPacket};

    #[test]
    fn test_frame_index_wraps() {
        let mut frame = 0;
        let mut seen = Vec::new();
        for _ in 0..MAX_FRAMES_IN_FLIGHT * 2 {
            seen.push(frame);
            frame = next_frame_index(frame);
        }
        assert!(seen.iter().all(|&f| f < MAX_FRAMES_IN_FLIGHT));
        assert_eq!(frame, 0);
        assert_eq!(next_frame_index(MAX_FRAMES_IN_FLIGHT - 1), 0);
    }

    #[test]
    fn test_image_owned_by_other_frame_must_be_waited() {
        // Three swapchain images, two frames in flight: slot 0 last used image 2.
        let images_in_flight = [None, Some(1), Some(0)];

        assert_eq!(pending_image_owner(&images_in_flight, 2, 1), Some(0));
        assert_eq!(pending_image_owner(&images_in_flight, 2, 0), None);
        assert_eq!(pending_image_owner(&images_in_flight, 0, 1), None);
        // Tracking cleared by a rebuild
        assert_eq!(pending_image_owner(&[], 2, 1), None);
    }

    #[test]
    fn test_full_viewport() {
        let viewport = full_viewport(vk::Extent2D { width: 800, height: 600 });
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.height, 600.0);
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }

    #[test]
    fn test_uninitialized_backend() {
        let mut backend = VulkanBackend::new(RendererConfig::default());
        assert!(!backend.is_initialized());
        assert!(backend.context().is_none());

        assert!(matches!(
            backend.begin_frame(0.016),
            Err(BackendError::Vulkan(VulkanError::NotInitialized))
        ));
        assert!(matches!(
            backend.end_frame(0.016),
            Err(BackendError::Vulkan(VulkanError::NotInitialized))
        ));
        assert!(backend.draw_frame(&RenderPacket { delta_time: 0.016 }).is_err());
        assert_eq!(backend.frame_number(), 0);

        backend.on_window_resize(1024, 768);
        backend.shutdown();
        backend.shutdown();
        assert!(!backend.is_initialized());
    }
}
