//! Render pass management
//!
//! The main render pass has a colour attachment (cleared, stored, handed to
//! presentation) and a depth attachment (cleared, discarded), bound into a
//! single subpass.

use ash::{vk, Device};

use super::command_buffer::{CommandBuffer, CommandBufferOp};
use super::error::{check, VulkanResult};
use super::framebuffer::FrameBuffer;

/// Lifecycle state of a render pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderPassState {
    /// Created and usable
    Ready,
    /// Being recorded
    Recording,
    /// Executing on the GPU
    InFlight,
    /// Recording ended
    RecordingFinished,
    /// Submitted to a queue
    Submitted,
    /// Destroyed or never created
    #[default]
    NotAllocated,
}

/// Values written to the attachments when the render pass begins
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClearValues {
    /// RGBA colour
    pub color: [f32; 4],
    /// Depth value
    pub depth: f32,
    /// Stencil value
    pub stencil: u32,
}

impl ClearValues {
    /// Colour value for attachment 0, depth/stencil for attachment 1
    pub fn to_vk(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: self.color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth,
                    stencil: self.stencil,
                },
            },
        ]
    }
}

/// Render pass with its render area and clear values
#[derive(Debug, Default)]
pub struct RenderPass {
    handle: vk::RenderPass,
    state: RenderPassState,
    render_area: vk::Rect2D,
    clear_values: ClearValues,
}

impl RenderPass {
    /// Create the main colour + depth render pass
    pub fn create(
        device: &Device,
        color_format: vk::Format,
        depth_format: vk::Format,
        render_area: vk::Rect2D,
        clear_values: ClearValues,
    ) -> VulkanResult<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let attachments = [color_attachment, depth_attachment];

        let color_attachment_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_attachment_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)
            .depth_stencil_attachment(&depth_attachment_ref)
            .build()];

        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = check(
            unsafe { device.create_render_pass(&create_info, None) },
            "vkCreateRenderPass",
        )?;
        log::info!("Main render pass created.");

        Ok(Self {
            handle,
            state: RenderPassState::Ready,
            render_area,
            clear_values,
        })
    }

    /// Begin the render pass on `framebuffer`, clearing both attachments
    pub fn begin(&self, device: &Device, command_buffer: &mut CommandBuffer, framebuffer: &FrameBuffer) -> VulkanResult<()> {
        command_buffer.check_transition(CommandBufferOp::BeginRenderPass)?;

        let clear_values = self.clear_values.to_vk();
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.handle)
            .framebuffer(framebuffer.handle())
            .render_area(self.render_area)
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(command_buffer.handle(), &begin_info, vk::SubpassContents::INLINE);
        }
        command_buffer.transition(CommandBufferOp::BeginRenderPass)
    }

    /// End the render pass, returning the buffer to plain recording
    pub fn end(&self, device: &Device, command_buffer: &mut CommandBuffer) -> VulkanResult<()> {
        command_buffer.check_transition(CommandBufferOp::EndRenderPass)?;
        unsafe { device.cmd_end_render_pass(command_buffer.handle()) };
        command_buffer.transition(CommandBufferOp::EndRenderPass)
    }

    /// Destroy the render pass; destroying twice only warns
    pub fn destroy(&mut self, device: &Device) {
        if self.handle == vk::RenderPass::null() {
            log::warn!("Attempted to destroy a render pass that was never created");
            return;
        }

        unsafe { device.destroy_render_pass(self.handle, None) };
        self.handle = vk::RenderPass::null();
        self.state = RenderPassState::NotAllocated;
    }

    /// Update the area cleared and rendered to
    pub fn set_render_area(&mut self, render_area: vk::Rect2D) {
        self.render_area = render_area;
    }

    /// Render pass handle
    pub const fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    /// Lifecycle state
    pub const fn state(&self) -> RenderPassState {
        self.state
    }

    /// Area cleared and rendered to
    pub const fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }

    /// Clear values applied on begin
    pub const fn clear_values(&self) -> ClearValues {
        self.clear_values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_values_layout() {
        let values = ClearValues {
            color: [0.1, 0.2, 0.3, 1.0],
            depth: 1.0,
            stencil: 7,
        };

        let [color, depth] = values.to_vk();
        unsafe {
            assert_eq!(color.color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(depth.depth_stencil.depth, 1.0);
            assert_eq!(depth.depth_stencil.stencil, 7);
        }
    }

    #[test]
    fn test_default_state_is_not_allocated() {
        assert_eq!(RenderPassState::default(), RenderPassState::NotAllocated);
    }
}
