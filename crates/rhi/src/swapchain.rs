//! Swapchain Manager.
//!
//! [`SwapchainManager`] owns the presentable image chain and everything that
//! depends on it: image views, the depth attachment and one framebuffer per
//! image. All of those objects belong to a [`SwapchainGeneration`], an arena
//! that records objects in creation order and releases them in reverse when
//! dropped. A rebuild drops the old generation as a unit and builds a new one;
//! a build that fails midway releases exactly what it had created.
//!
//! Recreation is reactive. Acquire and present report
//! [`AcquireOutcome::OutOfDate`] / [`PresentOutcome::OutOfDate`] and the
//! caller decides when to call [`SwapchainManager::recreate`]. Suboptimal is
//! reported but does not require recreation.
//!
//! While the surface has a zero-area client region (a minimized window)
//! recreation is deferred: no generation exists and
//! [`SwapchainManager::recreate`] returns [`RecreateOutcome::Deferred`] until
//! the area is non-zero again.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, info, warn};

use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult, ResultExt};
use crate::image::{DEFAULT_DEPTH_FORMAT, DepthImage};
use crate::instance::Instance;

/// Surface format tried first.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (image count range, extents, transforms)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .context("get_physical_device_surface_capabilities")?
        };

        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .context("get_physical_device_surface_formats")?
        };

        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .context("get_physical_device_surface_present_modes")?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// What the caller would like the swapchain to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPreferences {
    /// Used when the surface supports it, else the first supported format.
    pub surface_format: vk::SurfaceFormatKHR,
    /// Used when the surface supports it, else FIFO.
    pub present_mode: vk::PresentModeKHR,
    /// Format of the depth attachment.
    pub depth_format: vk::Format,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            surface_format: PREFERRED_SURFACE_FORMAT,
            present_mode: vk::PresentModeKHR::MAILBOX,
            depth_format: DEFAULT_DEPTH_FORMAT,
        }
    }
}

/// Result of [`SwapchainManager::recreate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    /// A new generation was built.
    Recreated {
        /// Number of presentable images.
        image_count: usize,
        /// Extent of the new images.
        extent: vk::Extent2D,
    },
    /// The surface has zero area; nothing was built.
    Deferred,
}

/// Parameters of one swapchain build, resolved against the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSpec {
    /// Image extent.
    pub extent: vk::Extent2D,
    /// Negotiated surface format.
    pub surface_format: vk::SurfaceFormatKHR,
    /// Negotiated present mode.
    pub present_mode: vk::PresentModeKHR,
    /// Minimum image count requested from the driver.
    pub image_count: u32,
    /// Surface transform applied on present.
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// What a rebuild should do, decided from the surface alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPlan {
    /// Zero-area surface. Nothing is built; the current generation, if
    /// there is one, is released.
    Defer {
        /// A generation exists and must be torn down.
        release_current: bool,
    },
    /// Tear down whatever exists and build with these parameters.
    Rebuild(SwapchainSpec),
}

/// Result of [`SwapchainManager::acquire_next_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired.
    Acquired {
        /// Index of the image.
        image_index: u32,
        /// The swapchain still works but no longer matches the surface exactly.
        suboptimal: bool,
    },
    /// The swapchain must be recreated before another acquire.
    OutOfDate,
}

/// Result of [`SwapchainManager::present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented.
    Presented,
    /// Presented; the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// Not presented; the swapchain must be recreated.
    OutOfDate,
}

/// One object owned by a generation.
enum GenerationObject {
    Swapchain(vk::SwapchainKHR),
    ImageView(vk::ImageView),
    Depth(DepthImage),
    Framebuffer(vk::Framebuffer),
}

/// All objects created for one swapchain build.
///
/// Dropping a generation releases every tracked object in reverse creation
/// order. The device must be idle with respect to these objects.
pub struct SwapchainGeneration {
    device: Arc<DeviceContext>,
    loader: ash::khr::swapchain::Device,
    objects: Vec<GenerationObject>,
    id: u64,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    framebuffers: Vec<vk::Framebuffer>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl SwapchainGeneration {
    fn empty(device: Arc<DeviceContext>, loader: ash::khr::swapchain::Device, id: u64) -> Self {
        Self {
            device,
            loader,
            objects: Vec::new(),
            id,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            framebuffers: Vec::new(),
            surface_format: PREFERRED_SURFACE_FORMAT,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
        }
    }

    /// Monotonic build number, starting at 1.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the presentable images.
    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Returns the framebuffer for an image index.
    #[inline]
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    /// Returns the negotiated surface format.
    #[inline]
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Returns the negotiated present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns the image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn release(&mut self, object: GenerationObject) {
        let device = self.device.handle();
        match object {
            GenerationObject::Framebuffer(framebuffer) => unsafe {
                device.destroy_framebuffer(framebuffer, None)
            },
            GenerationObject::Depth(depth) => drop(depth),
            GenerationObject::ImageView(view) => unsafe { device.destroy_image_view(view, None) },
            GenerationObject::Swapchain(swapchain) => unsafe {
                self.loader.destroy_swapchain(swapchain, None)
            },
        }
    }
}

impl Drop for SwapchainGeneration {
    fn drop(&mut self) {
        let count = self.objects.len();
        while let Some(object) = self.objects.pop() {
            self.release(object);
        }
        if count > 0 {
            info!(
                "Swapchain generation {} released ({} objects, was {}x{})",
                self.id, count, self.extent.width, self.extent.height
            );
        }
    }
}

/// Owns the swapchain and rebuilds it against the current surface.
///
/// Not thread-safe; driven by the render thread only.
pub struct SwapchainManager {
    device: Arc<DeviceContext>,
    loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    render_pass: vk::RenderPass,
    preferences: SwapchainPreferences,
    window_extent: vk::Extent2D,
    generation: Option<SwapchainGeneration>,
    builds: u64,
}

impl SwapchainManager {
    /// Creates the manager and builds the first generation.
    ///
    /// `render_pass` must outlive the manager; framebuffers are created
    /// against it with a color and a depth attachment. When the window
    /// starts with zero area no generation is built yet.
    ///
    /// # Errors
    ///
    /// Surface queries, swapchain creation, and view, depth or framebuffer
    /// creation failures are fatal.
    pub fn create(
        instance: &Instance,
        device: Arc<DeviceContext>,
        surface: vk::SurfaceKHR,
        render_pass: vk::RenderPass,
        preferences: SwapchainPreferences,
        window_extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        let mut manager = Self {
            device,
            loader,
            surface,
            surface_loader: instance.surface_loader(),
            render_pass,
            preferences,
            window_extent,
            generation: None,
            builds: 0,
        };

        match manager.plan()? {
            RebuildPlan::Defer { .. } => {
                info!("Swapchain creation deferred: window has zero area");
            }
            RebuildPlan::Rebuild(spec) => {
                manager.build(spec)?;
            }
        }
        Ok(manager)
    }

    /// Records the window's current client size in pixels.
    ///
    /// Takes effect on the next [`recreate`](Self::recreate).
    pub fn set_window_extent(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
    }

    /// Tears down the current generation and builds a new one.
    ///
    /// Waits for the device to be idle first. Safe to call repeatedly; with
    /// an unchanged surface the result is equivalent to the previous build.
    /// While the window has zero area this returns
    /// [`RecreateOutcome::Deferred`] and leaves no generation behind.
    pub fn recreate(&mut self) -> RhiResult<RecreateOutcome> {
        match self.plan()? {
            RebuildPlan::Defer { release_current } => {
                if release_current {
                    self.device.wait_idle()?;
                    self.generation = None;
                }
                debug!("Swapchain recreation deferred: surface has zero area");
                Ok(RecreateOutcome::Deferred)
            }
            RebuildPlan::Rebuild(spec) => {
                self.device.wait_idle()?;
                self.generation = None;

                let outcome = self.build(spec)?;
                info!("Swapchain recreated: {}x{}", spec.extent.width, spec.extent.height);
                Ok(outcome)
            }
        }
    }

    /// Acquires the next presentable image, signaling `semaphore`.
    ///
    /// Without a current generation this reports
    /// [`AcquireOutcome::OutOfDate`].
    ///
    /// # Errors
    ///
    /// Anything other than success, suboptimal or out-of-date is fatal. A
    /// wait longer than `timeout` nanoseconds is [`RhiError::Timeout`].
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> RhiResult<AcquireOutcome> {
        let Some(generation) = &self.generation else {
            return Ok(AcquireOutcome::OutOfDate);
        };

        let result = unsafe {
            self.loader.acquire_next_image(
                generation.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };
        classify_acquire(result)
    }

    /// Queues `image_index` for presentation after `wait_semaphore`.
    ///
    /// # Errors
    ///
    /// Anything other than success, suboptimal or out-of-date is fatal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let generation = self.generation.as_ref().ok_or_else(|| {
            RhiError::SwapchainError("present called without a swapchain".to_string())
        })?;

        let swapchains = [generation.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        classify_present(unsafe { self.loader.queue_present(queue, &present_info) })
    }

    /// Returns the current generation, if any.
    #[inline]
    pub fn generation(&self) -> Option<&SwapchainGeneration> {
        self.generation.as_ref()
    }

    /// Returns the number of images in the current generation, 0 if none.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.generation.as_ref().map_or(0, |g| g.images.len())
    }

    /// Returns the current extent.
    #[inline]
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.generation.as_ref().map(|g| g.extent)
    }

    /// Returns the framebuffer for an image of the current generation.
    #[inline]
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.generation.as_ref()?.framebuffer(image_index)
    }

    /// Returns the preferences the manager builds with.
    #[inline]
    pub fn preferences(&self) -> &SwapchainPreferences {
        &self.preferences
    }

    fn plan(&self) -> RhiResult<RebuildPlan> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;
        plan_rebuild(
            self.window_extent,
            self.generation.is_some(),
            &support,
            &self.preferences,
        )
    }

    fn build(&mut self, spec: SwapchainSpec) -> RhiResult<RecreateOutcome> {
        let SwapchainSpec {
            extent,
            surface_format,
            present_mode,
            image_count,
            pre_transform,
        } = spec;

        self.builds += 1;
        let mut generation =
            SwapchainGeneration::empty(self.device.clone(), self.loader.clone(), self.builds);
        generation.surface_format = surface_format;
        generation.present_mode = present_mode;
        generation.extent = extent;

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        let (graphics_family, present_family) = self.device.queue_families().resolved()?;
        let queue_family_indices = [graphics_family, present_family];

        let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices_slice)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // Every `?` below drops `generation`, releasing what was built so far.
        let swapchain = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .context("create_swapchain")?
        };
        generation.swapchain = swapchain;
        generation
            .objects
            .push(GenerationObject::Swapchain(swapchain));

        generation.images = unsafe {
            self.loader
                .get_swapchain_images(swapchain)
                .context("get_swapchain_images")?
        };

        let mut color_views = Vec::with_capacity(generation.images.len());
        for &image in &generation.images {
            let view = create_color_view(&self.device, image, surface_format.format)?;
            generation.objects.push(GenerationObject::ImageView(view));
            color_views.push(view);
        }

        let depth = DepthImage::new(self.device.clone(), extent, self.preferences.depth_format)?;
        let depth_view = depth.image_view();
        generation.objects.push(GenerationObject::Depth(depth));

        for &color_view in &color_views {
            let attachments = [color_view, depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe {
                self.device
                    .handle()
                    .create_framebuffer(&framebuffer_info, None)
                    .context("create_framebuffer")?
            };
            generation
                .objects
                .push(GenerationObject::Framebuffer(framebuffer));
            generation.framebuffers.push(framebuffer);
        }

        info!(
            "Swapchain generation {} built with {} images",
            generation.id,
            generation.images.len()
        );

        let image_count = generation.images.len();
        self.generation = Some(generation);
        Ok(RecreateOutcome::Recreated {
            image_count,
            extent,
        })
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        if self.generation.is_some() {
            if let Err(e) = self.device.wait_idle() {
                tracing::error!("Failed to wait for device idle before swapchain teardown: {}", e);
            }
            self.generation = None;
        }
    }
}

fn create_color_view(
    device: &DeviceContext,
    image: vk::Image,
    format: vk::Format,
) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    unsafe {
        device
            .handle()
            .create_image_view(&create_info, None)
            .context("create_image_view")
    }
}

/// Maps the raw acquire result onto the outcomes the frame loop handles.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(vk::Result::NOT_READY) => Err(RhiError::Timeout("acquire_next_image")),
        Err(e) => Err(e).context("acquire_next_image"),
    }
}

/// Maps the raw present result onto the outcomes the frame loop handles.
pub fn classify_present(result: VkResult<bool>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(e).context("queue_present"),
    }
}

/// Decides how to rebuild the swapchain for the given window size and
/// surface support.
///
/// A zero-area window, or a surface that itself reports a zero extent,
/// defers. Otherwise the extent, format, present mode and image count are
/// chosen from `support` and `preferences`. The result depends only on the
/// inputs, so an unchanged surface always yields the same plan.
///
/// # Errors
///
/// A surface with no formats or no present modes is
/// [`RhiError::SwapchainError`].
pub fn plan_rebuild(
    window_extent: vk::Extent2D,
    has_generation: bool,
    support: &SwapchainSupportDetails,
    preferences: &SwapchainPreferences,
) -> RhiResult<RebuildPlan> {
    let defer = RebuildPlan::Defer {
        release_current: has_generation,
    };
    if is_zero_area(window_extent) {
        return Ok(defer);
    }

    if !support.is_adequate() {
        return Err(RhiError::SwapchainError(
            "Inadequate swapchain support (no formats or present modes)".to_string(),
        ));
    }

    let extent = choose_extent(&support.capabilities, window_extent);
    if is_zero_area(extent) {
        debug!("Surface reports zero extent, deferring swapchain build");
        return Ok(defer);
    }

    Ok(RebuildPlan::Rebuild(SwapchainSpec {
        extent,
        surface_format: choose_surface_format(&support.formats, preferences.surface_format),
        present_mode: choose_present_mode(&support.present_modes, preferences.present_mode),
        image_count: determine_image_count(&support.capabilities),
        pre_transform: support.capabilities.current_transform,
    }))
}

/// True when either dimension is zero.
#[inline]
pub fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Chooses the surface format.
///
/// Uses `preferred` when listed (or when the surface accepts any format),
/// otherwise the first available format.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> vk::SurfaceFormatKHR {
    if let [only] = formats
        && only.format == vk::Format::UNDEFINED
    {
        return preferred;
    }

    if formats.contains(&preferred) {
        debug!("Selected preferred surface format: {:?}", preferred.format);
        return preferred;
    }

    match formats.first() {
        Some(&first) => {
            warn!("Using first available surface format: {:?}", first.format);
            first
        }
        None => preferred,
    }
}

/// Chooses the present mode: `preferred` if supported, else FIFO, which
/// every implementation supports.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        debug!("Selected {:?} present mode", preferred);
        return preferred;
    }

    debug!("{:?} unavailable, falling back to FIFO", preferred);
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent.
///
/// A fixed surface extent is used as-is; otherwise the window size is clamped
/// to the surface's min/max extent.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more image than the minimum, capped by the maximum when there is one.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn resizable_support() -> SwapchainSupportDetails {
        SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: extent(u32::MAX, u32::MAX),
                min_image_extent: extent(1, 1),
                max_image_extent: extent(4096, 4096),
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![
                format(vk::Format::R8G8B8A8_UNORM),
                format(vk::Format::B8G8R8A8_SRGB),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_requested() {
        let formats = vec![
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        let selected = choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT);
        assert_eq!(selected, PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = vec![
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        let selected = choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_colorspace_must_match() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
            format(vk::Format::R8G8B8A8_UNORM),
        ];
        let selected = choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT);
        assert_eq!(
            selected.color_space,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT
        );
    }

    #[test]
    fn test_choose_surface_format_undefined_means_any() {
        let formats = vec![format(vk::Format::UNDEFINED)];
        let selected = choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT);
        assert_eq!(selected, PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_fixed_surface_extent() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1920, 1080),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(100, 100),
            max_image_extent: extent(2000, 2000),
            ..Default::default()
        };

        assert_eq!(choose_extent(&capabilities, extent(3000, 3000)), extent(2000, 2000));
        assert_eq!(choose_extent(&capabilities, extent(50, 50)), extent(100, 100));
        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn test_minimized_surface_reports_zero_extent() {
        // Windows reports a fixed 0x0 extent while minimized.
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(0, 0),
            min_image_extent: extent(0, 0),
            max_image_extent: extent(0, 0),
            ..Default::default()
        };
        assert!(is_zero_area(choose_extent(&capabilities, extent(800, 600))));
        assert!(is_zero_area(extent(800, 0)));
        assert!(!is_zero_area(extent(1, 1)));
    }

    #[test]
    fn test_determine_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 2);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 4);
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 0,
                suboptimal: true
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::TIMEOUT)),
            Err(RhiError::Timeout("acquire_next_image"))
        ));
        let lost = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert!(lost.is_device_lost());
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(RhiError::VulkanOperation {
                operation: "queue_present",
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
            })
        ));
    }

    #[test]
    fn test_default_preferences() {
        let preferences = SwapchainPreferences::default();
        assert_eq!(preferences.surface_format, PREFERRED_SURFACE_FORMAT);
        assert_eq!(preferences.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(preferences.depth_format, DEFAULT_DEPTH_FORMAT);
    }

    #[test]
    fn test_plan_rebuild_resolves_parameters() {
        let plan = plan_rebuild(
            extent(800, 600),
            true,
            &resizable_support(),
            &SwapchainPreferences::default(),
        )
        .unwrap();

        assert_eq!(
            plan,
            RebuildPlan::Rebuild(SwapchainSpec {
                extent: extent(800, 600),
                surface_format: PREFERRED_SURFACE_FORMAT,
                present_mode: vk::PresentModeKHR::MAILBOX,
                image_count: 3,
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            })
        );
    }

    #[test]
    fn test_plan_rebuild_twice_with_unchanged_surface_is_equivalent() {
        let support = resizable_support();
        let preferences = SwapchainPreferences::default();

        // First build has no generation, the second replaces it.
        let first = plan_rebuild(extent(1280, 720), false, &support, &preferences).unwrap();
        let second = plan_rebuild(extent(1280, 720), true, &support, &preferences).unwrap();
        assert_eq!(first, second);

        let RebuildPlan::Rebuild(spec) = second else {
            panic!("expected a rebuild, got {:?}", second);
        };
        assert_eq!(spec.extent, extent(1280, 720));
        assert_eq!(spec.surface_format, PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn test_plan_rebuild_defers_zero_area_window() {
        let support = resizable_support();
        let preferences = SwapchainPreferences::default();

        assert_eq!(
            plan_rebuild(extent(0, 0), true, &support, &preferences).unwrap(),
            RebuildPlan::Defer {
                release_current: true
            }
        );
        assert_eq!(
            plan_rebuild(extent(640, 0), false, &support, &preferences).unwrap(),
            RebuildPlan::Defer {
                release_current: false
            }
        );
    }

    #[test]
    fn test_plan_rebuild_defers_when_surface_reports_zero_extent() {
        let mut support = resizable_support();
        support.capabilities.current_extent = extent(0, 0);

        let plan = plan_rebuild(
            extent(800, 600),
            true,
            &support,
            &SwapchainPreferences::default(),
        )
        .unwrap();
        assert_eq!(
            plan,
            RebuildPlan::Defer {
                release_current: true
            }
        );
    }

    #[test]
    fn test_plan_rebuild_rejects_inadequate_support() {
        let mut support = resizable_support();
        support.present_modes.clear();

        let result = plan_rebuild(
            extent(800, 600),
            false,
            &support,
            &SwapchainPreferences::default(),
        );
        assert!(matches!(result, Err(RhiError::SwapchainError(_))));
    }

    #[test]
    fn test_plan_rebuild_follows_new_window_size() {
        let support = resizable_support();
        let preferences = SwapchainPreferences::default();

        let before = plan_rebuild(extent(800, 600), true, &support, &preferences).unwrap();
        let after = plan_rebuild(extent(1024, 768), true, &support, &preferences).unwrap();
        assert!(matches!(
            before,
            RebuildPlan::Rebuild(SwapchainSpec { extent: e, .. }) if e == extent(800, 600)
        ));
        assert!(matches!(
            after,
            RebuildPlan::Rebuild(SwapchainSpec { extent: e, .. }) if e == extent(1024, 768)
        ));
    }
}
