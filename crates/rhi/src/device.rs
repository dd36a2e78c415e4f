//! Device Resource Context.
//!
//! [`DeviceContext`] is the single holder of device-level state every other
//! component needs: the logical device, the memory allocator, the graphics
//! and present queues, a command pool and a descriptor pool. It is created
//! once at startup and destroyed last.
//!
//! # Example
//!
//! ```no_run
//! use cadence_rhi::device::{ContextConfig, DeviceContext};
//! use cadence_rhi::instance::Instance;
//! use cadence_rhi::physical_device::select_physical_device;
//!
//! # fn example() -> Result<(), cadence_rhi::RhiError> {
//! let config = ContextConfig::headless();
//! let instance = Instance::new(&config, &[])?;
//! let info = select_physical_device(instance.handle(), None, &config.device_extensions)?;
//! let device = DeviceContext::new(&instance, &info, config)?;
//! device.wait_idle()?;
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, CString, c_char};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult, ResultExt};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// The Khronos validation layer name.
pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Immutable construction parameters, owned by the context afterwards.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Application name reported to the driver.
    pub application_name: CString,
    /// Requests the layers in `validation_layers` when they are installed.
    pub enable_validation: bool,
    /// Layers enabled when validation is on.
    pub validation_layers: Vec<&'static CStr>,
    /// Device extensions that must be supported and are enabled.
    pub device_extensions: Vec<&'static CStr>,
    /// Maximum sets in the shared descriptor pool.
    pub descriptor_pool_max_sets: u32,
}

impl ContextConfig {
    /// Configuration for rendering to a window surface.
    pub fn windowed(application_name: &str, enable_validation: bool) -> Self {
        Self {
            application_name: CString::new(application_name)
                .unwrap_or_else(|_| CString::from(c"cadence")),
            enable_validation,
            validation_layers: vec![VALIDATION_LAYER_NAME],
            device_extensions: vec![ash::khr::swapchain::NAME],
            descriptor_pool_max_sets: 64,
        }
    }

    /// Configuration without a surface: no swapchain extension is required.
    pub fn headless() -> Self {
        Self {
            device_extensions: Vec::new(),
            ..Self::windowed("cadence-headless", false)
        }
    }
}

/// Device Resource Context.
///
/// Shared as `Arc<DeviceContext>`. Everything created from it holds a clone
/// of that `Arc`, so the device outlives all of its objects.
pub struct DeviceContext {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    /// Dropped explicitly before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    command_pool: Mutex<vk::CommandPool>,
    descriptor_pool: vk::DescriptorPool,
    config: ContextConfig,
}

impl DeviceContext {
    /// Creates the logical device, its queues, the allocator and both pools.
    ///
    /// # Errors
    ///
    /// Missing queue families, device creation, allocator or pool creation
    /// failures are returned as-is; none of them are retried.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
        config: ContextConfig,
    ) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;
        let (graphics_family, present_family) = queue_families.resolved()?;

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let extension_names: Vec<*const c_char> = config
            .device_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)
                .context("create_device")?
        };

        info!(
            "Logical device created with {} extension(s)",
            extension_names.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            graphics_family, present_family
        );

        // From here on every failure must tear down what was already built.
        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(source) => {
                unsafe { device.destroy_device(None) };
                return Err(RhiError::AllocationFailed {
                    operation: "create_allocator",
                    size: 0,
                    source,
                });
            }
        };

        info!("GPU memory allocator initialized");

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(graphics_family);

        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                drop(allocator);
                unsafe { device.destroy_device(None) };
                return Err(RhiError::VulkanOperation {
                    operation: "create_command_pool",
                    result: e,
                });
            }
        };

        let descriptor_pool =
            match create_descriptor_pool(&device, config.descriptor_pool_max_sets) {
                Ok(pool) => pool,
                Err(e) => {
                    unsafe { device.destroy_command_pool(command_pool, None) };
                    drop(allocator);
                    unsafe { device.destroy_device(None) };
                    return Err(e);
                }
            };

        debug!(
            "Command pool and descriptor pool ({} sets) created",
            config.descriptor_pool_max_sets
        );

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            properties: physical_device_info.properties,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
            command_pool: Mutex::new(command_pool),
            descriptor_pool,
            config,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the physical device properties captured at creation.
    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Returns the configuration the context was built with.
    #[inline]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Returns the shared descriptor pool.
    #[inline]
    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.descriptor_pool
    }

    /// Locks the GPU memory allocator.
    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator.lock().map_err(|_| RhiError::AllocatorPoisoned)
    }

    /// Allocates primary command buffers from the context's pool.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        let pool = self.lock_command_pool()?;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .context("allocate_command_buffers")
        }
    }

    /// Returns command buffers to the pool.
    ///
    /// The buffers must not be pending execution.
    pub fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        match self.command_pool.lock() {
            Ok(pool) => unsafe { self.device.free_command_buffers(*pool, buffers) },
            Err(_) => tracing::error!(
                "Command pool lock poisoned, leaking {} buffer(s)",
                buffers.len()
            ),
        }
    }

    /// Waits for the device to become idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle().context("device_wait_idle") }
    }

    /// Waits until `queue` has drained.
    pub fn queue_wait_idle(&self, queue: vk::Queue) -> RhiResult<()> {
        unsafe { self.device.queue_wait_idle(queue).context("queue_wait_idle") }
    }

    fn lock_command_pool(&self) -> RhiResult<MutexGuard<'_, vk::CommandPool>> {
        self.command_pool
            .lock()
            .map_err(|_| RhiError::InvalidUsage("command pool lock poisoned".to_string()))
    }
}

fn create_descriptor_pool(device: &ash::Device, max_sets: u32) -> RhiResult<vk::DescriptorPool> {
    let max_sets = max_sets.max(1);
    let pool_sizes = [
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(max_sets),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(max_sets),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(max_sets),
    ];

    let create_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(max_sets)
        .pool_sizes(&pool_sizes);

    unsafe {
        device
            .create_descriptor_pool(&create_info, None)
            .context("create_descriptor_pool")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }

            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            let pool = match self.command_pool.get_mut() {
                Ok(pool) => *pool,
                Err(poisoned) => *poisoned.into_inner(),
            };
            self.device.destroy_command_pool(pool, None);

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device and the raw handles are plain data; the allocator and
// command pool are only reached through their mutexes.
unsafe impl Send for DeviceContext {}
unsafe impl Sync for DeviceContext {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windowed_config_requires_swapchain() {
        let config = ContextConfig::windowed("demo", true);
        assert!(config.device_extensions.contains(&ash::khr::swapchain::NAME));
        assert_eq!(config.validation_layers, vec![VALIDATION_LAYER_NAME]);
        assert_eq!(config.application_name.as_c_str(), c"demo");
    }

    #[test]
    fn test_headless_config_has_no_extensions() {
        let config = ContextConfig::headless();
        assert!(config.device_extensions.is_empty());
        assert!(!config.enable_validation);
    }

    #[test]
    fn test_interior_nul_falls_back() {
        let config = ContextConfig::windowed("bad\0name", false);
        assert_eq!(config.application_name.as_c_str(), c"cadence");
    }

    #[test]
    fn test_device_context_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DeviceContext>();
    }
}
