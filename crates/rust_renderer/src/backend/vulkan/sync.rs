//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! Semaphores order queue operations on the GPU and are kept as raw handles.
//! Fences are the CPU-visible completion signal; [`Fence`] mirrors the signal
//! state on the host so a wait on an already signaled fence never reaches the
//! driver.

use ash::{vk, Device};

use super::error::{check, VulkanError, VulkanResult};

/// Create a binary semaphore
pub fn create_semaphore(device: &Device) -> VulkanResult<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::builder();
    check(unsafe { device.create_semaphore(&create_info, None) }, "vkCreateSemaphore")
}

/// Fence with a host-side mirror of its signal state
#[derive(Debug, Default)]
pub struct Fence {
    handle: vk::Fence,
    is_signaled: bool,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn create(device: &Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let handle = check(unsafe { device.create_fence(&create_info, None) }, "vkCreateFence")?;

        Ok(Self {
            handle,
            is_signaled: signaled,
        })
    }

    /// Wait for the fence to be signaled.
    ///
    /// A timeout is recoverable and the wait may be retried; device loss and
    /// memory exhaustion are not.
    pub fn wait(&mut self, device: &Device, timeout_ns: u64) -> VulkanResult<()> {
        self.wait_with(timeout_ns, |fence, timeout| unsafe {
            device.wait_for_fences(&[fence], true, timeout)
        })
    }

    pub(crate) fn wait_with<F>(&mut self, timeout_ns: u64, wait: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::Fence, u64) -> Result<(), vk::Result>,
    {
        if self.is_signaled {
            return Ok(());
        }

        match wait(self.handle, timeout_ns) {
            Ok(()) => {
                self.is_signaled = true;
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => {
                log::warn!("Fence wait timed out after {} ns", timeout_ns);
                Err(VulkanError::Timeout)
            }
            Err(code) => {
                log::error!("vkWaitForFences failed with {:?}", code);
                Err(VulkanError::from_result("vkWaitForFences", code))
            }
        }
    }

    /// Reset a signaled fence so it can be submitted again.
    ///
    /// Fails without touching the fence when it is not signaled.
    pub fn reset(&mut self, device: &Device) -> VulkanResult<()> {
        self.reset_with(|fence| unsafe { device.reset_fences(&[fence]) })
    }

    pub(crate) fn reset_with<F>(&mut self, reset: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::Fence) -> Result<(), vk::Result>,
    {
        if !self.is_signaled {
            return Err(VulkanError::InvalidState {
                operation: "reset fence",
                state: "unsignaled".to_string(),
            });
        }

        check(reset(self.handle), "vkResetFences")?;
        self.is_signaled = false;
        Ok(())
    }

    /// Destroy the fence; destroying twice only warns
    pub fn destroy(&mut self, device: &Device) {
        if self.handle == vk::Fence::null() {
            log::warn!("Attempted to destroy a fence that was never created");
            return;
        }

        unsafe { device.destroy_fence(self.handle, None) };
        self.handle = vk::Fence::null();
        self.is_signaled = false;
    }

    /// Fence handle
    pub const fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Host-side view of the signal state
    pub const fn is_signaled(&self) -> bool {
        self.is_signaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signaled() -> Fence {
        Fence {
            handle: vk::Fence::null(),
            is_signaled: true,
        }
    }

    #[test]
    fn test_wait_on_signaled_fence_skips_driver() {
        let mut fence = signaled();
        let result = fence.wait_with(u64::MAX, |_, _| panic!("driver wait must not be called"));
        assert!(result.is_ok());
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_successful_wait_marks_signaled() {
        let mut fence = Fence::default();
        let mut calls = 0;
        fence
            .wait_with(1_000, |_, timeout| {
                calls += 1;
                assert_eq!(timeout, 1_000);
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let mut fence = Fence::default();
        let err = fence.wait_with(10, |_, _| Err(vk::Result::TIMEOUT)).unwrap_err();
        assert!(err.is_recoverable());
        assert!(!fence.is_signaled());

        // The caller may wait again
        assert!(fence.wait_with(10, |_, _| Ok(())).is_ok());
    }

    #[test]
    fn test_device_lost_during_wait_is_fatal() {
        let mut fence = Fence::default();
        let err = fence.wait_with(10, |_, _| Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert!(err.is_fatal());

        let err = fence.wait_with(10, |_, _| Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)).unwrap_err();
        assert!(matches!(err, VulkanError::OutOfMemory));
    }

    #[test]
    fn test_reset_requires_signaled_fence() {
        let mut fence = Fence::default();
        assert!(fence.reset_with(|_| panic!("driver reset must not be called")).is_err());

        let mut fence = signaled();
        fence.reset_with(|_| Ok(())).unwrap();
        assert!(!fence.is_signaled());
    }
}
