//! Framebuffer management
//!
//! A framebuffer binds concrete image views to the attachment slots of a
//! render pass at a fixed size. It keeps its own copy of the view list and
//! must be destroyed before those views are.

use ash::{vk, Device};

use super::error::{check, VulkanResult};
use super::render_pass::RenderPass;

/// Framebuffer with its attachment views
#[derive(Debug, Default)]
pub struct FrameBuffer {
    handle: vk::Framebuffer,
    attachments: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    width: u32,
    height: u32,
}

impl FrameBuffer {
    /// Create a framebuffer for `render_pass`; the views are copied
    pub fn create(
        device: &Device,
        render_pass: &RenderPass,
        width: u32,
        height: u32,
        attachments: &[vk::ImageView],
    ) -> VulkanResult<Self> {
        let attachments = attachments.to_vec();

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(&attachments)
            .width(width)
            .height(height)
            .layers(1);

        let handle = check(
            unsafe { device.create_framebuffer(&create_info, None) },
            "vkCreateFramebuffer",
        )?;

        Ok(Self {
            handle,
            attachments,
            render_pass: render_pass.handle(),
            width,
            height,
        })
    }

    /// Destroy the framebuffer; destroying twice only warns
    pub fn destroy(&mut self, device: &Device) {
        self.destroy_with(|handle| unsafe { device.destroy_framebuffer(handle, None) });
    }

    pub(crate) fn destroy_with<F>(&mut self, destroy: F)
    where
        F: FnOnce(vk::Framebuffer),
    {
        if self.handle == vk::Framebuffer::null() {
            log::warn!("Attempted to destroy a framebuffer that was never created");
            return;
        }

        destroy(self.handle);
        self.handle = vk::Framebuffer::null();
        self.attachments.clear();
        self.render_pass = vk::RenderPass::null();
    }

    /// Framebuffer handle
    pub const fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    /// Attachment views in slot order
    pub fn attachments(&self) -> &[vk::ImageView] {
        &self.attachments
    }

    /// Render pass this framebuffer was created for
    pub const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Width in pixels
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub const fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_destroying_unallocated_framebuffer_is_a_no_op() {
        let mut framebuffer = FrameBuffer::default();
        let mut calls = 0;
        framebuffer.destroy_with(|_| calls += 1);
        assert_eq!(calls, 0);
        assert_eq!(framebuffer.handle(), vk::Framebuffer::null());
    }

    #[test]
    fn test_destroy_releases_handle_once() {
        let mut framebuffer = FrameBuffer {
            handle: vk::Framebuffer::from_raw(7),
            attachments: vec![vk::ImageView::from_raw(1), vk::ImageView::from_raw(2)],
            render_pass: vk::RenderPass::from_raw(3),
            width: 640,
            height: 480,
        };

        let mut destroyed = Vec::new();
        framebuffer.destroy_with(|handle| destroyed.push(handle));
        framebuffer.destroy_with(|handle| destroyed.push(handle));

        assert_eq!(destroyed, vec![vk::Framebuffer::from_raw(7)]);
        assert!(framebuffer.attachments().is_empty());
        assert_eq!(framebuffer.render_pass(), vk::RenderPass::null());
    }
}
