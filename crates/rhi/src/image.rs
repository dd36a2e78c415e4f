//! Depth attachment and one-off image layout transitions.
//!
//! - [`DepthImage`] wraps a GPU-only depth image and its view.
//! - [`transition_image_layout`] moves an image between layouts in its own
//!   single-time submission.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult, ResultExt};
use crate::single_time::SingleTimeCommands;

/// Default depth format (32-bit floating point).
pub const DEFAULT_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Depth attachment for one swapchain generation.
///
/// Resources are destroyed view first, then image, then memory.
pub struct DepthImage {
    device: Arc<DeviceContext>,
    image: vk::Image,
    image_view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl DepthImage {
    /// Creates a depth image and view, then transitions it to
    /// `DEPTH_STENCIL_ATTACHMENT_OPTIMAL`.
    ///
    /// # Errors
    ///
    /// Fails on a zero extent, on image/view creation failure, on allocation
    /// failure (reporting the requested size) and on a failed transition.
    pub fn new(
        device: Arc<DeviceContext>,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidUsage(
                "Depth image dimensions must be greater than 0".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device
                .handle()
                .create_image(&image_info, None)
                .context("create_image")?
        };

        // Drop releases whatever has been filled in so far.
        let mut depth = Self {
            device,
            image,
            image_view: vk::ImageView::null(),
            allocation: None,
            format,
            extent,
        };

        let requirements = unsafe { depth.device.handle().get_image_memory_requirements(image) };

        let allocation = depth.device.allocator()?.allocate(&AllocationCreateDesc {
            name: "depth_image",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = allocation.map_err(|source| RhiError::AllocationFailed {
            operation: "depth_image",
            size: requirements.size,
            source,
        })?;

        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());
        depth.allocation = Some(allocation);
        unsafe {
            depth
                .device
                .handle()
                .bind_image_memory(image, memory, offset)
                .context("bind_image_memory")?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource_range(vk::ImageAspectFlags::DEPTH));

        depth.image_view = unsafe {
            depth
                .device
                .handle()
                .create_image_view(&view_info, None)
                .context("create_image_view")?
        };

        transition_image_layout(
            &depth.device,
            image,
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )?;

        debug!(
            "Created depth image: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(depth)
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Returns the Vulkan image view handle.
    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Returns the depth format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for DepthImage {
    fn drop(&mut self) {
        unsafe {
            if self.image_view != vk::ImageView::null() {
                self.device
                    .handle()
                    .destroy_image_view(self.image_view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free depth image allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking depth image memory: {}", e),
            }
        }

        debug!(
            "Destroyed depth image: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

/// Transitions `image` from `old_layout` to `new_layout`.
///
/// Records a single barrier in a single-time command buffer and blocks until
/// the graphics queue is idle.
///
/// # Errors
///
/// Returns [`RhiError::InvalidUsage`] for an unsupported layout pair.
pub fn transition_image_layout(
    device: &Arc<DeviceContext>,
    image: vk::Image,
    format: vk::Format,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> RhiResult<()> {
    let access = transition_access(old_layout, new_layout)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect_for(format, new_layout)))
        .src_access_mask(access.src_access)
        .dst_access_mask(access.dst_access);

    let cmd = SingleTimeCommands::begin(device.clone())?;
    cmd.recorder()
        .pipeline_barrier(access.src_stage, access.dst_stage, &[barrier]);
    cmd.end(device.graphics_queue())?;

    debug!("Transitioned image {:?} -> {:?}", old_layout, new_layout);
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct TransitionAccess {
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

fn transition_access(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> RhiResult<TransitionAccess> {
    let access = match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => {
            TransitionAccess {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            }
        }
        (old, new) => {
            return Err(RhiError::InvalidUsage(format!(
                "Unsupported layout transition {:?} -> {:?}",
                old, new
            )));
        }
    };
    Ok(access)
}

fn aspect_for(format: vk::Format, layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if layout != vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        return vk::ImageAspectFlags::COLOR;
    }
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_transition_access() {
        let access = transition_access(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(access.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(access.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(
            access
                .dst_access
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }

    #[test]
    fn test_unsupported_transition_is_rejected() {
        let result = transition_access(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert!(matches!(result, Err(RhiError::InvalidUsage(_))));
    }

    #[test]
    fn test_aspect_for_stencil_formats() {
        let layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        assert_eq!(
            aspect_for(DEFAULT_DEPTH_FORMAT, layout),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for(vk::Format::D24_UNORM_S8_UINT, layout),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for(
                vk::Format::R8G8B8A8_SRGB,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            ),
            vk::ImageAspectFlags::COLOR
        );
    }
}
