//! GPU buffer management.
//!
//! - [`BufferUsage`] picks the Vulkan usage flags and memory location.
//! - [`Buffer`] wraps a VkBuffer with gpu-allocator managed memory.
//! - [`copy_buffer`] performs an isolated, synchronous buffer-to-buffer copy.
//!
//! Device-local buffers (vertex, index, uniform, storage) are filled through
//! the [`TransferEngine`](crate::transfer::TransferEngine) or [`copy_buffer`];
//! only staging and read-back buffers are host visible.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult, ResultExt};
use crate::single_time::SingleTimeCommands;

/// Buffer usage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer
    Vertex,
    /// Index buffer
    Index,
    /// Uniform buffer
    Uniform,
    /// Storage buffer
    Storage,
    /// Host-writable copy source
    Staging,
    /// Host-readable copy destination
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        // Every usage can also be read back for verification.
        let transfer = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | transfer,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER | transfer,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER | transfer,
            BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER | transfer,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex
            | BufferUsage::Index
            | BufferUsage::Uniform
            | BufferUsage::Storage => MemoryLocation::GpuOnly,
            BufferUsage::Staging => MemoryLocation::CpuToGpu,
            BufferUsage::Readback => MemoryLocation::GpuToCpu,
        }
    }

    /// Returns true if the memory is mapped for host access.
    pub fn is_host_visible(self) -> bool {
        matches!(self, BufferUsage::Staging | BufferUsage::Readback)
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// GPU buffer wrapper with managed memory.
pub struct Buffer {
    device: Arc<DeviceContext>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a new buffer with the specified size.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidUsage`] for a zero size and
    /// [`RhiError::AllocationFailed`] (with the requested size) when memory
    /// cannot be allocated.
    pub fn new(
        device: Arc<DeviceContext>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidUsage(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .handle()
                .create_buffer(&buffer_info, None)
                .context("create_buffer")?
        };

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: usage.name(),
                    requirements,
                    location: usage.memory_location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|source| RhiError::AllocationFailed {
                    operation: usage.name(),
                    size,
                    source,
                })
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up both the buffer and the allocation.
        let buffer = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };

        if let Some(allocation) = &buffer.allocation {
            unsafe {
                buffer
                    .device
                    .handle()
                    .bind_buffer_memory(buffer.buffer, allocation.memory(), allocation.offset())
                    .context("bind_buffer_memory")?;
            }
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(buffer)
    }

    /// Returns the mapped memory of a host-visible buffer.
    ///
    /// The slice covers exactly `size()` bytes.
    pub fn mapped_slice_mut(&mut self) -> RhiResult<&mut [u8]> {
        let size = self.size as usize;
        let usage = self.usage;
        let allocation = self.allocation.as_mut().ok_or_else(|| {
            RhiError::InvalidUsage("Buffer allocation is not available".to_string())
        })?;

        let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
            RhiError::InvalidUsage(format!("{} buffer memory is not mapped", usage.name()))
        })?;

        Ok(&mut mapped[..size])
    }

    /// Reads the contents of a host-visible buffer.
    ///
    /// Any GPU writes must have completed, e.g. through [`copy_buffer`].
    pub fn read_data(&self) -> RhiResult<Vec<u8>> {
        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidUsage("Buffer allocation is not available".to_string())
        })?;

        let mapped = allocation.mapped_slice().ok_or_else(|| {
            RhiError::InvalidUsage(format!("{} buffer memory is not mapped", self.usage.name()))
        })?;

        Ok(mapped[..self.size as usize].to_vec())
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the buffer usage type.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Free allocation first, then destroy buffer
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        tracing::error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => tracing::error!("Leaking {} buffer memory: {}", self.usage.name(), e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

/// Copies `size` bytes from `src` to `dst` in its own single-time submission.
///
/// Blocks until the graphics queue is idle.
pub fn copy_buffer(
    device: &Arc<DeviceContext>,
    src: &Buffer,
    dst: &Buffer,
    size: vk::DeviceSize,
) -> RhiResult<()> {
    if size > src.size() || size > dst.size() {
        return Err(RhiError::InvalidUsage(format!(
            "Copy of {} bytes exceeds buffer sizes ({} -> {})",
            size,
            src.size(),
            dst.size()
        )));
    }

    let cmd = SingleTimeCommands::begin(device.clone())?;
    cmd.recorder().copy_buffer(src.handle(), dst.handle(), size);
    if let Some(barrier) = host_read_barrier(dst.usage(), dst.handle(), size) {
        cmd.recorder().buffer_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            &[barrier],
        );
    }
    cmd.end(device.graphics_queue())
}

/// Barrier making a transfer write to `buffer` visible to host reads.
///
/// Only read-back buffers are read by the host; other usages get `None`.
fn host_read_barrier(
    usage: BufferUsage,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
) -> Option<vk::BufferMemoryBarrier<'static>> {
    if usage != BufferUsage::Readback {
        return None;
    }

    Some(
        vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(size),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Storage
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::STORAGE_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            BufferUsage::Readback.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(
            BufferUsage::Vertex.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferUsage::Uniform.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Readback.memory_location(),
            MemoryLocation::GpuToCpu
        );
    }

    #[test]
    fn test_only_transfer_buffers_are_host_visible() {
        assert!(BufferUsage::Staging.is_host_visible());
        assert!(BufferUsage::Readback.is_host_visible());
        assert!(!BufferUsage::Storage.is_host_visible());
        assert!(!BufferUsage::Index.is_host_visible());
    }

    #[test]
    fn test_readback_copy_gets_host_read_barrier() {
        use ash::vk::Handle;

        let buffer = vk::Buffer::from_raw(0x42);
        let barrier = host_read_barrier(BufferUsage::Readback, buffer, 256).unwrap();
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::HOST_READ);
        assert_eq!(barrier.buffer, buffer);
        assert_eq!(barrier.size, 256);

        for usage in [BufferUsage::Storage, BufferUsage::Staging, BufferUsage::Vertex] {
            assert!(host_read_barrier(usage, buffer, 256).is_none());
        }
    }
}
