//! Command buffer management
//!
//! A command buffer moves through
//! `Ready -> Recording -> (InRenderPass) -> RecordingFinished -> Submitted -> Ready`.
//! Every transition is checked against [`CommandBufferState::after`] before
//! the driver is called, so an illegal call leaves the buffer untouched.

use std::fmt;

use ash::{vk, Device};

use super::error::{check, VulkanError, VulkanResult};
use super::sync::Fence;

/// Recording state of a command buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommandBufferState {
    /// No native buffer behind this record
    #[default]
    NotAllocated,
    /// Allocated and ready to begin recording
    Ready,
    /// Recording commands
    Recording,
    /// Recording inside a render pass
    InRenderPass,
    /// Recording ended, ready to submit
    RecordingFinished,
    /// Submitted to a queue
    Submitted,
}

/// Operations that change a command buffer's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferOp {
    /// Allocate from a pool
    Allocate,
    /// Begin recording
    Begin,
    /// Begin a render pass
    BeginRenderPass,
    /// End a render pass
    EndRenderPass,
    /// End recording
    End,
    /// Mark as submitted
    Submit,
    /// Return to ready
    Reset,
    /// Return to the pool
    Free,
}

impl CommandBufferOp {
    const fn name(self) -> &'static str {
        match self {
            Self::Allocate => "allocate command buffer",
            Self::Begin => "begin command buffer",
            Self::BeginRenderPass => "begin render pass",
            Self::EndRenderPass => "end render pass",
            Self::End => "end command buffer",
            Self::Submit => "submit command buffer",
            Self::Reset => "reset command buffer",
            Self::Free => "free command buffer",
        }
    }
}

impl fmt::Display for CommandBufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotAllocated => "not allocated",
            Self::Ready => "ready",
            Self::Recording => "recording",
            Self::InRenderPass => "in a render pass",
            Self::RecordingFinished => "finished recording",
            Self::Submitted => "submitted",
        };
        f.write_str(name)
    }
}

impl CommandBufferState {
    /// State reached by applying `op`, or an error if `op` is not allowed
    pub fn after(self, op: CommandBufferOp) -> VulkanResult<Self> {
        use CommandBufferOp as Op;
        use CommandBufferState as S;

        let next = match (op, self) {
            (Op::Allocate, S::NotAllocated) => Some(S::Ready),
            (Op::Begin, S::Ready) => Some(S::Recording),
            (Op::BeginRenderPass, S::Recording) => Some(S::InRenderPass),
            (Op::EndRenderPass, S::InRenderPass) => Some(S::Recording),
            (Op::End, S::Recording | S::InRenderPass) => Some(S::RecordingFinished),
            (Op::Submit, S::RecordingFinished) => Some(S::Submitted),
            (Op::Reset | Op::Free, state) if state != S::NotAllocated => {
                Some(if op == Op::Reset { S::Ready } else { S::NotAllocated })
            }
            _ => None,
        };

        next.ok_or_else(|| VulkanError::InvalidState {
            operation: op.name(),
            state: self.to_string(),
        })
    }
}

/// Command buffer with its recording state
#[derive(Debug, Default)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    /// Allocate a primary or secondary command buffer from `pool`
    pub fn allocate(device: &Device, pool: vk::CommandPool, is_primary: bool) -> VulkanResult<Self> {
        let mut command_buffer = Self::default();
        let next = command_buffer.state.after(CommandBufferOp::Allocate)?;

        let level = if is_primary {
            vk::CommandBufferLevel::PRIMARY
        } else {
            vk::CommandBufferLevel::SECONDARY
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(1);

        let handles = check(
            unsafe { device.allocate_command_buffers(&alloc_info) },
            "vkAllocateCommandBuffers",
        )?;
        command_buffer.handle = handles[0];
        command_buffer.state = next;
        Ok(command_buffer)
    }

    /// Return the buffer to `pool`; freeing an unallocated buffer only warns
    pub fn free(&mut self, device: &Device, pool: vk::CommandPool) {
        let Ok(next) = self.state.after(CommandBufferOp::Free) else {
            log::warn!("Attempted to free a command buffer that is not allocated");
            return;
        };

        unsafe { device.free_command_buffers(pool, &[self.handle]) };
        self.handle = vk::CommandBuffer::null();
        self.state = next;
    }

    /// Begin recording.
    ///
    /// Only valid from [`CommandBufferState::Ready`].
    pub fn begin(
        &mut self,
        device: &Device,
        is_single_use: bool,
        is_renderpass_continue: bool,
        is_simultaneous_use: bool,
    ) -> VulkanResult<()> {
        let next = self.state.after(CommandBufferOp::Begin)?;

        let mut flags = vk::CommandBufferUsageFlags::empty();
        if is_single_use {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if is_renderpass_continue {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        if is_simultaneous_use {
            flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        check(
            unsafe { device.begin_command_buffer(self.handle, &begin_info) },
            "vkBeginCommandBuffer",
        )?;
        self.state = next;
        Ok(())
    }

    /// End recording
    pub fn end(&mut self, device: &Device) -> VulkanResult<()> {
        let next = self.state.after(CommandBufferOp::End)?;
        check(unsafe { device.end_command_buffer(self.handle) }, "vkEndCommandBuffer")?;
        self.state = next;
        Ok(())
    }

    /// Mark the buffer as submitted after a successful queue submit
    pub fn update_submitted(&mut self) -> VulkanResult<()> {
        self.state = self.state.after(CommandBufferOp::Submit)?;
        Ok(())
    }

    /// Return the buffer to the ready state.
    ///
    /// The pool is created with `RESET_COMMAND_BUFFER`, so the next begin
    /// resets the native buffer implicitly.
    pub fn reset(&mut self) -> VulkanResult<()> {
        self.state = self.state.after(CommandBufferOp::Reset)?;
        Ok(())
    }

    pub(crate) fn transition(&mut self, op: CommandBufferOp) -> VulkanResult<()> {
        self.state = self.state.after(op)?;
        Ok(())
    }

    pub(crate) fn check_transition(&self, op: CommandBufferOp) -> VulkanResult<CommandBufferState> {
        self.state.after(op)
    }

    /// Allocate a primary buffer and begin it for one-time submission
    pub fn allocate_and_begin_single_use(device: &Device, pool: vk::CommandPool) -> VulkanResult<Self> {
        let mut command_buffer = Self::allocate(device, pool, true)?;
        if let Err(err) = command_buffer.begin(device, true, false, false) {
            command_buffer.free(device, pool);
            return Err(err);
        }
        Ok(command_buffer)
    }

    /// End, submit and wait for a single-use buffer, then free it
    pub fn end_single_use(
        &mut self,
        device: &Device,
        pool: vk::CommandPool,
        queue: vk::Queue,
        fence: Option<&Fence>,
    ) -> VulkanResult<()> {
        let result = self.submit_and_wait(device, queue, fence);
        self.free(device, pool);
        result
    }

    fn submit_and_wait(&mut self, device: &Device, queue: vk::Queue, fence: Option<&Fence>) -> VulkanResult<()> {
        self.end(device)?;

        let command_buffers = [self.handle];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        let fence = fence.map_or_else(vk::Fence::null, Fence::handle);

        check(unsafe { device.queue_submit(queue, &[submit_info], fence) }, "vkQueueSubmit")?;
        self.update_submitted()?;

        check(unsafe { device.queue_wait_idle(queue) }, "vkQueueWaitIdle")
    }

    /// Native handle
    pub const fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Current recording state
    pub const fn state(&self) -> CommandBufferState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CommandBufferOp as Op;
    use CommandBufferState as S;

    #[test]
    fn test_full_cycle() {
        let mut state = S::NotAllocated;
        for op in [Op::Allocate, Op::Begin, Op::BeginRenderPass, Op::EndRenderPass, Op::End, Op::Submit, Op::Reset] {
            state = state.after(op).unwrap();
        }
        assert_eq!(state, S::Ready);
    }

    #[test]
    fn test_begin_only_from_ready() {
        assert_eq!(S::Ready.after(Op::Begin).unwrap(), S::Recording);

        for state in [S::NotAllocated, S::Recording, S::InRenderPass, S::RecordingFinished, S::Submitted] {
            assert!(
                matches!(state.after(Op::Begin), Err(VulkanError::InvalidState { .. })),
                "begin accepted from {state}"
            );
        }
    }

    #[test]
    fn test_rejected_begin_leaves_state_unchanged() {
        let mut command_buffer = CommandBuffer {
            handle: vk::CommandBuffer::null(),
            state: S::Submitted,
        };
        assert!(command_buffer.transition(Op::Begin).is_err());
        assert_eq!(command_buffer.state(), S::Submitted);

        let mut command_buffer = CommandBuffer::default();
        assert!(command_buffer.transition(Op::Begin).is_err());
        assert_eq!(command_buffer.state(), S::NotAllocated);
    }

    #[test]
    fn test_end_from_recording_or_render_pass() {
        assert_eq!(S::Recording.after(Op::End).unwrap(), S::RecordingFinished);
        assert_eq!(S::InRenderPass.after(Op::End).unwrap(), S::RecordingFinished);
        assert!(S::Ready.after(Op::End).is_err());
    }

    #[test]
    fn test_submit_is_explicit() {
        let mut command_buffer = CommandBuffer {
            handle: vk::CommandBuffer::null(),
            state: S::RecordingFinished,
        };
        command_buffer.update_submitted().unwrap();
        assert_eq!(command_buffer.state(), S::Submitted);
        assert!(command_buffer.update_submitted().is_err());

        command_buffer.reset().unwrap();
        assert_eq!(command_buffer.state(), S::Ready);
    }

    #[test]
    fn test_unallocated_buffer_cannot_be_reset_or_freed() {
        assert!(S::NotAllocated.after(Op::Reset).is_err());
        assert!(S::NotAllocated.after(Op::Free).is_err());
        assert_eq!(S::Submitted.after(Op::Free).unwrap(), S::NotAllocated);
    }

    #[test]
    fn test_render_pass_nesting() {
        assert!(S::Ready.after(Op::BeginRenderPass).is_err());
        assert!(S::InRenderPass.after(Op::BeginRenderPass).is_err());
        assert!(S::Recording.after(Op::EndRenderPass).is_err());
    }
}
