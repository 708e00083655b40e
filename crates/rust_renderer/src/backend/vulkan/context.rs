//! Vulkan context management
//!
//! The context owns every GPU object of the backend. Construction follows
//! instance, surface, device, swapchain, render pass, framebuffers, command
//! buffers, sync objects; [`VulkanContext::shutdown`] tears them down in the
//! reverse order.

use ash::extensions::khr::Surface;
use ash::vk;

use super::command_buffer::CommandBuffer;
use super::device::VulkanDevice;
use super::error::{VulkanError, VulkanResult};
use super::frame::next_frame_index;
use super::framebuffer::FrameBuffer;
use super::instance::VulkanInstance;
use super::render_pass::{ClearValues, RenderPass};
use super::swapchain::{Swapchain, MAX_FRAMES_IN_FLIGHT};
use super::sync::{create_semaphore, Fence};
use crate::config::RendererConfig;
use crate::platform::PlatformSurface;

/// Main Vulkan context that owns all core Vulkan resources
pub struct VulkanContext {
    pub(crate) instance: VulkanInstance,
    pub(crate) surface_loader: Surface,
    pub(crate) surface: vk::SurfaceKHR,

    pub(crate) resize: ResizeState,

    pub(crate) device: VulkanDevice,
    pub(crate) swapchain: Swapchain,
    pub(crate) main_render_pass: RenderPass,
    pub(crate) framebuffers: Vec<FrameBuffer>,
    pub(crate) graphics_command_buffers: Vec<CommandBuffer>,

    pub(crate) image_available_semaphores: Vec<vk::Semaphore>,
    pub(crate) queue_complete_semaphores: Vec<vk::Semaphore>,
    pub(crate) in_flight_fences: Vec<Fence>,
    /// Per swapchain image: the frame whose fence last used it
    pub(crate) images_in_flight: Vec<Option<usize>>,

    pub(crate) image_index: u32,
    pub(crate) current_frame: usize,
    /// Set while the swapchain is rebuilt; stays set if the rebuild fails
    pub(crate) recreating_swapchain: bool,
    pub(crate) frame_timeout_ns: u64,
    destroyed: bool,
}

/// Framebuffer size as reported by the window, with a generation counter.
///
/// Every resize bumps the generation. The swapchain is considered up to date
/// once a rebuild for the current generation has completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeState {
    width: u32,
    height: u32,
    generation: u64,
    applied_generation: u64,
}

impl ResizeState {
    /// Initial size, already applied
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            generation: 0,
            applied_generation: 0,
        }
    }

    /// Record a new size
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.generation += 1;
    }

    /// Whether a size change has not been applied to the swapchain yet
    pub const fn is_pending(&self) -> bool {
        self.generation != self.applied_generation
    }

    /// Whether both dimensions are non-zero
    pub const fn has_area(&self) -> bool {
        self.width != 0 && self.height != 0
    }

    /// Mark the size of `generation` as applied
    pub fn mark_applied(&mut self, generation: u64) {
        self.applied_generation = generation;
    }

    /// Current size
    pub const fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of resizes seen so far
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Render area covering a whole extent
pub const fn full_render_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

impl VulkanContext {
    /// Create a new Vulkan context for the platform window
    pub fn new(config: &RendererConfig, app_name: &str, platform: &mut dyn PlatformSurface) -> VulkanResult<Self> {
        let mut instance = VulkanInstance::new(config, app_name, platform)?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        log::debug!("Creating Vulkan surface...");
        let surface = match platform.create_surface(&instance.entry, &instance.instance) {
            Ok(surface) => surface,
            Err(err) => {
                log::error!("Failed to create platform surface: {}", err);
                instance.destroy();
                return Err(err.into());
            }
        };
        log::debug!("Vulkan surface created.");

        let device = match VulkanDevice::create(&instance.instance, &surface_loader, surface, &config.device) {
            Ok(device) => device,
            Err(err) => {
                log::error!("Failed to create device: {}", err);
                unsafe { surface_loader.destroy_surface(surface, None) };
                instance.destroy();
                return Err(err);
            }
        };

        let (framebuffer_width, framebuffer_height) = platform.framebuffer_size();
        let clear_values = ClearValues {
            color: config.clear_color,
            depth: config.clear_depth,
            stencil: config.clear_stencil,
        };

        let mut context = Self {
            instance,
            surface_loader,
            surface,
            resize: ResizeState::new(framebuffer_width, framebuffer_height),
            device,
            swapchain: Swapchain::default(),
            main_render_pass: RenderPass::default(),
            framebuffers: Vec::new(),
            graphics_command_buffers: Vec::new(),
            image_available_semaphores: Vec::new(),
            queue_complete_semaphores: Vec::new(),
            in_flight_fences: Vec::new(),
            images_in_flight: Vec::new(),
            image_index: 0,
            current_frame: 0,
            recreating_swapchain: false,
            frame_timeout_ns: config.frame_timeout(),
            destroyed: false,
        };

        if let Err(err) = context.create_resources(clear_values) {
            log::error!("Vulkan context initialization failed: {}", err);
            context.shutdown();
            return Err(err);
        }

        log::info!("Vulkan renderer initialized successfully.");
        Ok(context)
    }

    fn create_resources(&mut self, clear_values: ClearValues) -> VulkanResult<()> {
        let (width, height) = self.resize.size();
        self.swapchain = Swapchain::create(
            &self.instance.instance,
            &self.surface_loader,
            self.surface,
            &mut self.device,
            width,
            height,
        )?;

        self.main_render_pass = RenderPass::create(
            &self.device.logical,
            self.swapchain.image_format().format,
            self.device.depth_format,
            full_render_area(self.swapchain.extent()),
            clear_values,
        )?;

        self.regenerate_framebuffers()?;
        self.create_command_buffers()?;
        self.create_sync_objects()
    }

    fn regenerate_framebuffers(&mut self) -> VulkanResult<()> {
        let extent = self.swapchain.extent();
        let depth_view = self
            .swapchain
            .depth_attachment()
            .view()
            .ok_or_else(|| VulkanError::InitializationFailed("depth attachment has no view".to_string()))?;

        self.framebuffers.reserve(self.swapchain.views().len());
        for &color_view in self.swapchain.views() {
            let framebuffer = FrameBuffer::create(
                &self.device.logical,
                &self.main_render_pass,
                extent.width,
                extent.height,
                &[color_view, depth_view],
            )?;
            self.framebuffers.push(framebuffer);
        }

        log::debug!("Created {} framebuffers", self.framebuffers.len());
        Ok(())
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in &mut self.framebuffers {
            framebuffer.destroy(&self.device.logical);
        }
        self.framebuffers.clear();
    }

    fn create_command_buffers(&mut self) -> VulkanResult<()> {
        for _ in 0..self.swapchain.image_count() {
            let command_buffer = CommandBuffer::allocate(&self.device.logical, self.device.graphics_command_pool, true)?;
            self.graphics_command_buffers.push(command_buffer);
        }

        log::debug!("Vulkan command buffers created.");
        Ok(())
    }

    fn free_command_buffers(&mut self) {
        for command_buffer in &mut self.graphics_command_buffers {
            command_buffer.free(&self.device.logical, self.device.graphics_command_pool);
        }
        self.graphics_command_buffers.clear();
    }

    fn create_sync_objects(&mut self) -> VulkanResult<()> {
        let logical = &self.device.logical;
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            self.image_available_semaphores.push(create_semaphore(logical)?);
            self.queue_complete_semaphores.push(create_semaphore(logical)?);

            // Signaled so the first frame does not wait forever.
            self.in_flight_fences.push(Fence::create(logical, true)?);
        }

        self.images_in_flight = vec![None; self.swapchain.image_count() as usize];
        Ok(())
    }

    /// Record a new framebuffer size; the swapchain is rebuilt on the next frame
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.resize.resize(width, height);

        log::info!(
            "Vulkan renderer resized: w/h/gen: {}/{}/{}",
            width,
            height,
            self.resize.generation()
        );
    }

    /// Rebuild the swapchain and everything that depends on it.
    ///
    /// Returns `Ok(false)` when the window has a zero dimension. A rebuild
    /// that fails partway leaves the context without framebuffers or command
    /// buffers, so every failure is escalated to a fatal error and later
    /// calls report [`VulkanError::SwapchainIncomplete`].
    pub fn recreate_swapchain(&mut self) -> VulkanResult<bool> {
        if self.recreating_swapchain {
            log::error!("recreate_swapchain called after a failed rebuild");
            return Err(VulkanError::SwapchainIncomplete);
        }

        if !self.resize.has_area() {
            log::debug!("recreate_swapchain called when window is < 1 in a dimension. Booting.");
            return Ok(false);
        }

        let generation = self.resize.generation();
        self.recreating_swapchain = true;
        self.rebuild_swapchain_resources()
            .map_err(|err| err.into_fatal("swapchain rebuild"))?;
        self.recreating_swapchain = false;
        self.resize.mark_applied(generation);

        Ok(true)
    }

    fn rebuild_swapchain_resources(&mut self) -> VulkanResult<()> {
        let (width, height) = self.resize.size();
        self.device.wait_idle()?;
        self.images_in_flight.fill(None);

        // Framebuffers go before the views they reference.
        self.free_command_buffers();
        self.destroy_framebuffers();

        self.swapchain.recreate(
            &self.instance.instance,
            &self.surface_loader,
            self.surface,
            &mut self.device,
            width,
            height,
        )?;

        let extent = self.swapchain.extent();
        self.main_render_pass.set_render_area(full_render_area(extent));
        self.images_in_flight = vec![None; self.swapchain.image_count() as usize];

        self.regenerate_framebuffers()?;
        self.create_command_buffers()?;

        log::info!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Acquire the next swapchain image.
    ///
    /// An out-of-date swapchain is recreated at the current framebuffer size
    /// and `Ok(None)` is returned so the frame is skipped.
    pub fn acquire_next_image(
        &mut self,
        timeout_ns: u64,
        image_available: vk::Semaphore,
        fence: vk::Fence,
    ) -> VulkanResult<Option<u32>> {
        match self
            .swapchain
            .acquire_next_image_index(&self.device, timeout_ns, image_available, fence)?
        {
            Some(index) => Ok(Some(index)),
            None => {
                log::debug!("Swapchain out of date during acquire, recreating");
                self.recreate_swapchain()?;
                Ok(None)
            }
        }
    }

    /// Present `image_index` once `render_complete` is signaled.
    ///
    /// Out-of-date and suboptimal swapchains are recreated. The frame index
    /// advances whatever the outcome.
    pub fn present(&mut self, render_complete: vk::Semaphore, image_index: u32) -> VulkanResult<()> {
        let needs_recreate = self
            .swapchain
            .present(&self.device, self.device.present_queue, render_complete, image_index);

        self.current_frame = next_frame_index(self.current_frame);

        if needs_recreate? {
            log::debug!("Swapchain out of date or suboptimal after present, recreating");
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    /// Tear everything down in reverse creation order. Safe to call twice.
    pub fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }

        if let Err(err) = self.device.wait_idle() {
            log::warn!("Device did not go idle before shutdown: {}", err);
        }

        let logical = &self.device.logical;
        log::debug!("Destroying sync objects...");
        unsafe {
            for semaphore in self.image_available_semaphores.drain(..) {
                logical.destroy_semaphore(semaphore, None);
            }
            for semaphore in self.queue_complete_semaphores.drain(..) {
                logical.destroy_semaphore(semaphore, None);
            }
        }
        for fence in &mut self.in_flight_fences {
            fence.destroy(logical);
        }
        self.in_flight_fences.clear();
        self.images_in_flight.clear();

        log::debug!("Freeing command buffers...");
        self.free_command_buffers();

        log::debug!("Destroying framebuffers...");
        self.destroy_framebuffers();

        if self.main_render_pass.handle() != vk::RenderPass::null() {
            log::debug!("Destroying render pass...");
            self.main_render_pass.destroy(&self.device.logical);
        }

        log::debug!("Destroying swapchain...");
        self.swapchain.destroy(&self.device);

        self.device.destroy();

        log::debug!("Destroying Vulkan surface...");
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
        self.surface = vk::SurfaceKHR::null();

        self.instance.destroy();
        self.destroyed = true;
        log::info!("Vulkan context destroyed.");
    }

    /// Selected device and its queues
    pub const fn device(&self) -> &VulkanDevice {
        &self.device
    }

    /// Current swapchain
    pub const fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Main render pass
    pub const fn main_render_pass(&self) -> &RenderPass {
        &self.main_render_pass
    }

    /// Framebuffers, one per swapchain image
    pub fn framebuffers(&self) -> &[FrameBuffer] {
        &self.framebuffers
    }

    /// Index of the image acquired for the current frame
    pub const fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Frame-in-flight slot in use, cycling modulo [`MAX_FRAMES_IN_FLIGHT`]
    pub const fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Whether a swapchain rebuild started and did not complete
    pub const fn is_recreating_swapchain(&self) -> bool {
        self.recreating_swapchain
    }

    /// Current framebuffer size
    pub const fn framebuffer_size(&self) -> (u32, u32) {
        self.resize.size()
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_size_is_applied() {
        let state = ResizeState::new(1280, 720);
        assert!(!state.is_pending());
        assert!(state.has_area());
        assert_eq!(state.size(), (1280, 720));
    }

    #[test]
    fn test_resize_stays_pending_until_applied() {
        let mut state = ResizeState::new(1280, 720);
        state.resize(800, 600);
        assert!(state.is_pending());

        // A rebuild that failed never marks its generation applied.
        assert!(state.is_pending());

        let generation = state.generation();
        state.mark_applied(generation);
        assert!(!state.is_pending());
        assert_eq!(state.size(), (800, 600));
    }

    #[test]
    fn test_resize_after_rebuild_started_is_not_lost() {
        let mut state = ResizeState::new(1280, 720);
        state.resize(800, 600);
        let rebuilt_for = state.generation();

        state.resize(640, 480);
        state.mark_applied(rebuilt_for);
        assert!(state.is_pending());
    }

    #[test]
    fn test_minimized_window_has_no_area() {
        let mut state = ResizeState::new(1280, 720);
        state.resize(0, 720);
        assert!(!state.has_area());
        state.resize(1280, 0);
        assert!(!state.has_area());
        assert!(state.is_pending());
    }

    #[test]
    fn test_full_render_area() {
        let area = full_render_area(vk::Extent2D { width: 640, height: 480 });
        assert_eq!((area.offset.x, area.offset.y), (0, 0));
        assert_eq!((area.extent.width, area.extent.height), (640, 480));
    }
}
