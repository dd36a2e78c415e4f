//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides the device-level building blocks of the renderer on
//! top of `ash`:
//! - Instance, physical device selection and the [`device::DeviceContext`]
//! - Swapchain lifecycle with generation-scoped resources
//! - Command buffers and single-time command execution
//! - Buffers, depth images and layout transitions
//! - Batched host-to-device transfers
//! - Synchronization primitives

mod error;

pub mod buffer;
pub mod command;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod shader;
pub mod single_time;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use error::{ResultExt, RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
