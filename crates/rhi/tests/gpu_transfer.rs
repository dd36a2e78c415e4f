//! Device-backed tests for the transfer path.
//!
//! These need a Vulkan driver. Without one each test prints a message and
//! returns.

use std::sync::Arc;

use cadence_rhi::RhiError;
use cadence_rhi::buffer::{Buffer, BufferUsage, copy_buffer};
use cadence_rhi::device::{ContextConfig, DeviceContext};
use cadence_rhi::image::{DEFAULT_DEPTH_FORMAT, DepthImage};
use cadence_rhi::instance::Instance;
use cadence_rhi::physical_device::select_physical_device;
use cadence_rhi::shader::ShaderModule;
use cadence_rhi::transfer::TransferEngine;
use cadence_rhi::vk;

/// Fields drop in order: the device before the instance it came from.
struct Gpu {
    device: Arc<DeviceContext>,
    _instance: Instance,
}

fn headless_context() -> Option<Gpu> {
    let config = ContextConfig::headless();
    let instance = match Instance::new(&config, &[]) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("Skipping test: Vulkan not available ({e})");
            return None;
        }
    };
    let info = match select_physical_device(instance.handle(), None, &config.device_extensions) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("Skipping test: no usable GPU ({e})");
            return None;
        }
    };
    match DeviceContext::new(&instance, &info, config) {
        Ok(device) => Some(Gpu {
            device,
            _instance: instance,
        }),
        Err(e) => {
            eprintln!("Skipping test: device creation failed ({e})");
            None
        }
    }
}

fn read_back(device: &Arc<DeviceContext>, source: &Buffer) -> Vec<u8> {
    let readback = Buffer::new(device.clone(), BufferUsage::Readback, source.size())
        .expect("readback buffer");
    copy_buffer(device, source, &readback, source.size()).expect("copy to readback");
    readback.read_data().expect("read back")
}

#[test]
fn test_flushed_copies_are_byte_identical() {
    let Some(gpu) = headless_context() else {
        return;
    };
    let device = gpu.device.clone();

    let dst_a = Buffer::new(device.clone(), BufferUsage::Storage, 64).unwrap();
    let dst_b = Buffer::new(device.clone(), BufferUsage::Vertex, 128).unwrap();

    let payload_a: Vec<u8> = (0..64u8).collect();
    let payload_b: Vec<u8> = (0..128u8).rev().collect();

    let mut transfers = TransferEngine::new(device.clone());
    transfers
        .queue_copy(dst_a.handle(), 64)
        .unwrap()
        .copy_from_slice(&payload_a);
    transfers
        .queue_copy(dst_b.handle(), 128)
        .unwrap()
        .copy_from_slice(&payload_b);
    assert_eq!(transfers.flush().unwrap(), 2);
    assert_eq!(transfers.stats().submissions, 1);
    assert!(transfers.is_empty());

    assert_eq!(read_back(&device, &dst_a), payload_a);
    assert_eq!(read_back(&device, &dst_b), payload_b);
}

#[test]
fn test_pod_upload_round_trip() {
    let Some(gpu) = headless_context() else {
        return;
    };
    let device = gpu.device.clone();

    let values: Vec<u32> = (0..256).map(|i| i * 3 + 1).collect();
    let dst = Buffer::new(device.clone(), BufferUsage::Uniform, 1024).unwrap();

    let mut transfers = TransferEngine::new(device.clone());
    transfers.queue_write_pod(dst.handle(), &values).unwrap();
    transfers.flush().unwrap();

    let bytes = read_back(&device, &dst);
    let read: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|word| u32::from_ne_bytes([word[0], word[1], word[2], word[3]]))
        .collect();
    assert_eq!(&read[..values.len()], values.as_slice());
}

#[test]
fn test_empty_flush_and_zero_sized_buffer() {
    let Some(gpu) = headless_context() else {
        return;
    };
    let device = gpu.device.clone();

    let mut transfers = TransferEngine::new(device.clone());
    assert_eq!(transfers.flush().unwrap(), 0);

    assert!(matches!(
        Buffer::new(device.clone(), BufferUsage::Storage, 0),
        Err(RhiError::InvalidUsage(_))
    ));
}

#[test]
fn test_depth_image_and_empty_shader() {
    let Some(gpu) = headless_context() else {
        return;
    };
    let device = gpu.device.clone();

    let extent = vk::Extent2D {
        width: 64,
        height: 32,
    };
    let depth = DepthImage::new(device.clone(), extent, DEFAULT_DEPTH_FORMAT).unwrap();
    assert_eq!(depth.extent(), extent);
    assert_ne!(depth.image_view(), vk::ImageView::null());

    assert!(matches!(
        ShaderModule::from_bytes(device.clone(), &[]),
        Err(RhiError::ShaderError(_))
    ));
}
