//! Resource loading.
//!
//! This crate decodes images on a pool of worker threads. It shares no state
//! with the GPU layer; decoded pixels are handed over as plain byte buffers.

mod error;
pub mod image_loader;

pub use error::{ResourceError, ResourceResult};
pub use image_loader::{DecodedImage, decode_image, load_images};
