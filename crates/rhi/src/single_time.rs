//! Single-time command execution.
//!
//! One primary command buffer, recorded once, submitted alone, waited on
//! with `queue_wait_idle`, then freed. Meant for infrequent work such as
//! layout transitions and uploads, never for the per-frame path.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cadence_rhi::device::DeviceContext;
//! use cadence_rhi::single_time::SingleTimeCommands;
//!
//! # fn example(device: Arc<DeviceContext>, src: ash::vk::Buffer, dst: ash::vk::Buffer)
//! #     -> Result<(), cadence_rhi::RhiError> {
//! let cmd = SingleTimeCommands::begin(device.clone())?;
//! cmd.recorder().copy_buffer(src, dst, 256);
//! cmd.end(device.graphics_queue())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error};

use crate::command::CommandBuffer;
use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult, ResultExt};

/// A command buffer open for one-time recording.
///
/// Dropping it without calling [`end`](Self::end) frees the buffer without
/// submitting anything.
pub struct SingleTimeCommands {
    device: Arc<DeviceContext>,
    cmd: CommandBuffer,
    released: bool,
}

impl SingleTimeCommands {
    /// Allocates a primary command buffer and begins one-time recording.
    pub fn begin(device: Arc<DeviceContext>) -> RhiResult<Self> {
        let handle = device
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidUsage("no command buffer allocated".to_string()))?;

        let commands = Self {
            cmd: CommandBuffer::from_handle(device.clone(), handle),
            device,
            released: false,
        };
        commands.cmd.begin()?;
        Ok(commands)
    }

    /// Returns the recorder for this buffer.
    #[inline]
    pub fn recorder(&self) -> &CommandBuffer {
        &self.cmd
    }

    /// Returns the raw handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.cmd.handle()
    }

    /// Ends recording, submits to `queue` and blocks until the queue is idle.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal for the caller: the GPU state is unknown.
    pub fn end(mut self, queue: vk::Queue) -> RhiResult<()> {
        self.cmd.end()?;

        let buffers = [self.cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);

        unsafe {
            self.device
                .handle()
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .context("queue_submit")?;
        }

        if let Err(e) = self.device.queue_wait_idle(queue) {
            // The buffer may still be pending; leave it to the pool.
            error!("Single-time submission did not complete: {}", e);
            self.released = true;
            return Err(e);
        }

        self.release();
        debug!("Single-time command buffer completed");
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.device.free_command_buffers(&[self.cmd.handle()]);
            self.released = true;
        }
    }
}

impl Drop for SingleTimeCommands {
    fn drop(&mut self) {
        self.release();
    }
}
