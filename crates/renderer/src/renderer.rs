//! Main renderer orchestration.
//!
//! This module provides the [`Renderer`], which owns every GPU object for one
//! window and hosts the [`FrameScheduler`].

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use cadence_core::{Config, PresentModePreference};
use cadence_platform::{Surface, Window, WindowEventHandler, required_extensions};
use cadence_resources::DecodedImage;
use cadence_rhi::buffer::{Buffer, BufferUsage};
use cadence_rhi::device::{ContextConfig, DeviceContext};
use cadence_rhi::image::DEFAULT_DEPTH_FORMAT;
use cadence_rhi::instance::Instance;
use cadence_rhi::physical_device::{PresentTarget, select_physical_device};
use cadence_rhi::swapchain::{
    AcquireOutcome, PREFERRED_SURFACE_FORMAT, PresentOutcome, RecreateOutcome,
    SwapchainManager, SwapchainPreferences, SwapchainSupportDetails, choose_surface_format,
};
use cadence_rhi::sync;
use cadence_rhi::transfer::{TransferEngine, TransferStats};
use cadence_rhi::{ResultExt, RhiError, RhiResult};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::frame_resources::FrameResources;
use crate::frame_scheduler::{
    FrameContext, FrameOutcome, FrameScheduler, FrameSlot, FrameStats, FrameTarget,
};
use crate::render_pass::{RenderPass, clear_values};

/// Maps the configured preference to a Vulkan present mode.
pub fn present_mode_for(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentModePreference::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

/// A decoded image living in a device-local storage buffer.
pub struct UploadedImage {
    pub name: String,
    pub width: u32,
    pub height: u32,
    buffer: Buffer,
}

impl UploadedImage {
    #[inline]
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

/// [`FrameTarget`] over the real device and swapchain.
struct VulkanFrameTarget<'a> {
    device: &'a DeviceContext,
    swapchain: &'a mut SwapchainManager,
}

impl VulkanFrameTarget<'_> {
    fn swapchain(&self) -> &SwapchainManager {
        self.swapchain
    }
}

impl FrameTarget for VulkanFrameTarget<'_> {
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
        sync::wait_for_fence(self.device, fence, timeout)
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
        sync::reset_fence(self.device, fence)
    }

    fn acquire_next_image(
        &mut self,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> RhiResult<AcquireOutcome> {
        self.swapchain.acquire_next_image(semaphore, timeout)
    }

    fn submit(&mut self, slot: &FrameSlot) -> RhiResult<()> {
        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer];
        let signal_semaphores = [slot.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .handle()
                .queue_submit(self.device.graphics_queue(), &[submit_info], slot.in_flight)
                .context("queue_submit")
        }
    }

    fn present(
        &mut self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        self.swapchain
            .present(self.device.present_queue(), image_index, wait_semaphore)
    }

    fn recreate_swapchain(&mut self) -> RhiResult<RecreateOutcome> {
        self.swapchain.recreate()
    }
}

/// Owns all GPU state for one window and renders frames into it.
///
/// # Resource Destruction Order
///
/// Fields drop in declaration order:
/// 1. Pending transfers and uploaded buffers
/// 2. Frame slots (after waiting for the device to go idle)
/// 3. Swapchain generation, then the render pass it was built against
/// 4. The device context, once its last `Arc` is gone
/// 5. Surface, then instance
pub struct Renderer {
    scheduler: FrameScheduler,
    transfers: TransferEngine,
    uploaded: Vec<UploadedImage>,
    frames: FrameResources,
    swapchain: SwapchainManager,
    render_pass: RenderPass,
    device: Arc<DeviceContext>,
    surface: Surface,
    instance: Instance,
    clear_color: [f32; 4],
}

impl Renderer {
    /// Creates a renderer for `window`.
    ///
    /// # Errors
    ///
    /// Any failure while building the instance, device, swapchain or frame
    /// slots is fatal and returned as is. Surface problems are reported as
    /// [`RhiError::SurfaceError`].
    pub fn new(window: &Window, config: &Config) -> RhiResult<Self> {
        info!(
            "Initializing renderer ({}x{})",
            window.width(),
            window.height()
        );

        let display_handle = window
            .raw_display_handle()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let surface_extensions =
            required_extensions(display_handle).map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let mut context_config =
            ContextConfig::windowed(&config.window.title, config.gpu.validation);
        context_config.descriptor_pool_max_sets = config.gpu.descriptor_pool_max_sets;

        let instance = Instance::new(&context_config, &surface_extensions)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let info = select_physical_device(
            instance.handle(),
            Some(PresentTarget {
                surface: surface.handle(),
                loader: surface.loader(),
            }),
            &context_config.device_extensions,
        )?;

        let device = DeviceContext::new(&instance, &info, context_config)?;

        // The render pass must exist before the first framebuffer, so the
        // color format is negotiated here and pinned in the preferences.
        let support = SwapchainSupportDetails::query(
            device.physical_device(),
            surface.handle(),
            surface.loader(),
        )?;
        let surface_format = choose_surface_format(&support.formats, PREFERRED_SURFACE_FORMAT);

        let render_pass =
            RenderPass::new(device.clone(), surface_format.format, DEFAULT_DEPTH_FORMAT)?;

        let preferences = SwapchainPreferences {
            surface_format,
            present_mode: present_mode_for(config.gpu.present_mode),
            depth_format: DEFAULT_DEPTH_FORMAT,
        };
        let swapchain = SwapchainManager::create(
            &instance,
            device.clone(),
            surface.handle(),
            render_pass.handle(),
            preferences,
            vk::Extent2D {
                width: window.width(),
                height: window.height(),
            },
        )?;

        let frames = FrameResources::new(device.clone(), MAX_FRAMES_IN_FLIGHT)?;
        let scheduler = FrameScheduler::new(
            frames.slots(),
            swapchain.image_count(),
            config.gpu.frame_timeout_ns(),
        )?;
        let transfers = TransferEngine::new(device.clone());

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight",
            swapchain.image_count(),
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            scheduler,
            transfers,
            uploaded: Vec::new(),
            frames,
            swapchain,
            render_pass,
            device,
            surface,
            instance,
            clear_color: config.render.clear_color,
        })
    }

    /// Renders one frame that clears the swapchain image.
    ///
    /// Out-of-date and minimized surfaces are handled internally and come
    /// back as [`FrameOutcome::Skipped`].
    ///
    /// # Errors
    ///
    /// Any other failure is fatal.
    pub fn render_frame(&mut self) -> RhiResult<FrameOutcome> {
        let frames = &self.frames;
        let render_pass = self.render_pass.handle();
        let clear_color = self.clear_color;

        let mut target = VulkanFrameTarget {
            device: &self.device,
            swapchain: &mut self.swapchain,
        };

        self.scheduler.run_frame(&mut target, |target, frame| {
            record_clear(frames, target.swapchain(), render_pass, clear_color, frame)
        })
    }

    /// Uploads decoded images into device-local storage buffers.
    ///
    /// All copies go through one batched flush. Returns the number of images
    /// uploaded; empty images are skipped. On error nothing is uploaded and
    /// the transfer batch is left empty.
    pub fn upload_images(&mut self, images: &HashMap<String, DecodedImage>) -> RhiResult<usize> {
        let staged = match self.stage_images(images) {
            Ok(staged) => staged,
            Err(e) => {
                self.transfers.discard();
                return Err(e);
            }
        };

        let copies = match self.transfers.flush() {
            Ok(copies) => copies,
            Err(e) => {
                // The failed submission may still be reading the batch.
                if let Err(idle) = self.device.wait_idle() {
                    warn!("Failed to wait for device idle after upload error: {}", idle);
                }
                self.transfers.discard();
                return Err(e);
            }
        };
        debug!("Flushed {} image copies", copies);

        let count = staged.len();
        self.uploaded.extend(staged);
        info!(
            "Uploaded {} images ({} total resident)",
            count,
            self.uploaded.len()
        );
        Ok(count)
    }

    fn stage_images(
        &mut self,
        images: &HashMap<String, DecodedImage>,
    ) -> RhiResult<Vec<UploadedImage>> {
        let mut names: Vec<&String> = images.keys().collect();
        names.sort();

        let mut staged = Vec::with_capacity(names.len());
        for name in names {
            let image = &images[name];
            if image.pixels.is_empty() {
                warn!("Skipping empty image '{}'", name);
                continue;
            }

            let buffer = Buffer::new(
                self.device.clone(),
                BufferUsage::Storage,
                image.byte_len() as vk::DeviceSize,
            )?;
            self.transfers.queue_write(buffer.handle(), &image.pixels)?;
            staged.push(UploadedImage {
                name: name.clone(),
                width: image.width,
                height: image.height,
                buffer,
            });
        }
        Ok(staged)
    }

    /// Images uploaded so far.
    #[inline]
    pub fn uploaded_images(&self) -> &[UploadedImage] {
        &self.uploaded
    }

    /// Frame scheduler counters.
    #[inline]
    pub fn frame_stats(&self) -> FrameStats {
        self.scheduler.stats()
    }

    /// Transfer engine counters.
    #[inline]
    pub fn transfer_stats(&self) -> TransferStats {
        self.transfers.stats()
    }

    /// Current swapchain extent, or `None` while deferred.
    #[inline]
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.extent()
    }

    /// Blocks until the device is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    /// The device context shared with collaborators.
    #[inline]
    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    /// Whether validation layers are active.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.instance.has_validation()
    }
}

impl WindowEventHandler for Renderer {
    fn on_resize(&mut self, width: u32, height: u32) {
        debug!("Window resized to {}x{}", width, height);
        self.swapchain.set_window_extent(width, height);
        self.scheduler.notify_resized();
    }

    fn on_minimized(&mut self, minimized: bool) {
        if minimized {
            debug!("Window minimized");
            self.swapchain.set_window_extent(0, 0);
            self.scheduler.notify_resized();
        } else {
            debug!("Window restored");
        }
    }
}

fn record_clear(
    frames: &FrameResources,
    swapchain: &SwapchainManager,
    render_pass: vk::RenderPass,
    clear_color: [f32; 4],
    frame: &FrameContext,
) -> RhiResult<()> {
    let framebuffer = swapchain.framebuffer(frame.image_index).ok_or_else(|| {
        RhiError::SwapchainError(format!("No framebuffer for image {}", frame.image_index))
    })?;
    let extent = swapchain
        .extent()
        .ok_or_else(|| RhiError::SwapchainError("No swapchain to record into".to_string()))?;

    let cmd = frames.command_buffer(frame.slot.command_buffer);
    cmd.reset()?;
    cmd.begin()?;

    let clear_values = clear_values(clear_color);
    let begin_info = vk::RenderPassBeginInfo::default()
        .render_pass(render_pass)
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .clear_values(&clear_values);

    cmd.begin_render_pass(&begin_info);
    cmd.end_render_pass();
    cmd.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_mapping() {
        assert_eq!(
            present_mode_for(PresentModePreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            present_mode_for(PresentModePreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            present_mode_for(PresentModePreference::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            present_mode_for(PresentModePreference::FifoRelaxed),
            vk::PresentModeKHR::FIFO_RELAXED
        );
    }
}
