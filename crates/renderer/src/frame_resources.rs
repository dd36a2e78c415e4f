//! Owned handles behind the scheduler's frame slots.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use cadence_rhi::RhiResult;
use cadence_rhi::command::CommandBuffer;
use cadence_rhi::device::DeviceContext;
use cadence_rhi::sync::{Fence, Semaphore};

use crate::frame_scheduler::FrameSlot;

/// Command buffers, semaphores and fences for every frame slot.
///
/// Fences are created signaled so the first wait on each slot returns
/// immediately. Dropping waits for the device to go idle before releasing
/// anything.
pub struct FrameResources {
    device: Arc<DeviceContext>,
    command_buffers: Vec<vk::CommandBuffer>,
    image_available: Vec<Semaphore>,
    render_finished: Vec<Semaphore>,
    in_flight: Vec<Fence>,
}

impl FrameResources {
    /// Creates resources for `count` frame slots.
    ///
    /// # Errors
    ///
    /// Returns an error if any allocation or object creation fails. Objects
    /// created before the failure are released.
    pub fn new(device: Arc<DeviceContext>, count: usize) -> RhiResult<Self> {
        let mut resources = Self {
            device: device.clone(),
            command_buffers: Vec::new(),
            image_available: Vec::with_capacity(count),
            render_finished: Vec::with_capacity(count),
            in_flight: Vec::with_capacity(count),
        };

        resources.command_buffers = device.allocate_command_buffers(count as u32)?;
        for i in 0..count {
            resources
                .image_available
                .push(Semaphore::new(device.clone())?);
            resources
                .render_finished
                .push(Semaphore::new(device.clone())?);
            resources.in_flight.push(Fence::new(device.clone(), true)?);
            debug!("Created frame slot {}", i);
        }

        info!("Created resources for {} frame slots", count);
        Ok(resources)
    }

    /// Handles of every slot, in slot order.
    pub fn slots(&self) -> Vec<FrameSlot> {
        (0..self.len())
            .map(|i| FrameSlot {
                command_buffer: self.command_buffers[i],
                image_available: self.image_available[i].handle(),
                render_finished: self.render_finished[i].handle(),
                in_flight: self.in_flight[i].handle(),
            })
            .collect()
    }

    /// Recording wrapper around a slot's command buffer handle.
    pub fn command_buffer(&self, handle: vk::CommandBuffer) -> CommandBuffer {
        CommandBuffer::from_handle(self.device.clone(), handle)
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns `true` if there are no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle before freeing frame slots: {}", e);
        }
        self.device.free_command_buffers(&self.command_buffers);
        debug!("Freed {} frame command buffers", self.command_buffers.len());
    }
}
