//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Vulkan API error with the operation that produced it
    #[error("Vulkan error in {operation}: {result}")]
    VulkanOperation {
        /// Logical operation, e.g. `"queue_submit"`.
        operation: &'static str,
        /// The failing result code.
        result: vk::Result,
    },

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU memory allocation failed
    #[error("Allocation failed in {operation} ({size} bytes): {source}")]
    AllocationFailed {
        /// Logical operation that requested the memory.
        operation: &'static str,
        /// Requested size in bytes.
        size: vk::DeviceSize,
        /// Underlying allocator error.
        #[source]
        source: gpu_allocator::AllocationError,
    },

    /// The allocator mutex was poisoned by a panicking thread
    #[error("GPU allocator lock poisoned")]
    AllocatorPoisoned,

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A required queue family is not available
    #[error("Missing queue family: {0}")]
    MissingQueueFamily(&'static str),

    /// A fence or acquire wait exceeded its timeout
    #[error("Timed out waiting in {0}")]
    Timeout(&'static str),

    /// Shader module error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// API misuse detected before reaching Vulkan
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

/// Attaches the logical operation name to a raw Vulkan result.
pub trait ResultExt<T> {
    /// Maps `Err(result)` to [`RhiError::VulkanOperation`] (or
    /// [`RhiError::Timeout`] for `vk::Result::TIMEOUT`).
    fn context(self, operation: &'static str) -> RhiResult<T>;
}

impl<T> ResultExt<T> for Result<T, vk::Result> {
    fn context(self, operation: &'static str) -> RhiResult<T> {
        self.map_err(|result| match result {
            vk::Result::TIMEOUT => RhiError::Timeout(operation),
            result => RhiError::VulkanOperation { operation, result },
        })
    }
}

impl RhiError {
    /// Returns true if this error reports a lost device.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
                | RhiError::VulkanOperation {
                    result: vk::Result::ERROR_DEVICE_LOST,
                    ..
                }
        )
    }
}
