//! Synchronization primitives for Vulkan.
//!
//! - [`Semaphore`] orders GPU work against other GPU work (acquire, submit,
//!   present).
//! - [`Fence`] lets the CPU wait for submitted GPU work to complete.
//!
//! Waits take a timeout in nanoseconds; `u64::MAX` waits forever. A wait that
//! expires returns [`RhiError::Timeout`](crate::RhiError::Timeout).

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{RhiResult, ResultExt};

/// Vulkan semaphore wrapper. Created unsignaled.
pub struct Semaphore {
    device: Arc<DeviceContext>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<DeviceContext>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe {
            device
                .handle()
                .create_semaphore(&create_info, None)
                .context("create_semaphore")?
        };

        debug!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<DeviceContext>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The device context
    /// * `signaled` - Creates the fence signaled, so that the first wait on
    ///   it returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<DeviceContext>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe {
            device
                .handle()
                .create_fence(&create_info, None)
                .context("create_fence")?
        };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence");
    }
}

/// Waits on a raw fence handle owned elsewhere.
pub fn wait_for_fence(device: &DeviceContext, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
    unsafe {
        device
            .handle()
            .wait_for_fences(&[fence], true, timeout)
            .context("wait_for_fences")
    }
}

/// Resets a raw fence handle owned elsewhere.
pub fn reset_fence(device: &DeviceContext, fence: vk::Fence) -> RhiResult<()> {
    unsafe {
        device
            .handle()
            .reset_fences(&[fence])
            .context("reset_fences")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence>();
    }
}
