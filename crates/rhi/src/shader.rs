//! Shader module creation.
//!
//! Shader bytecode is treated as an opaque byte sequence: it is read in full
//! from a source and handed to `vkCreateShaderModule`. The only check is that
//! it is not empty.

use std::io::Read;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult, ResultExt};

/// Reads a shader byte source to its end.
pub fn read_shader_bytes<R: Read>(mut reader: R) -> RhiResult<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| RhiError::ShaderError(format!("Failed to read shader bytes: {}", e)))?;
    Ok(bytes)
}

/// Packs bytes into native-endian words, zero-padding a trailing partial word.
fn to_code_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_ne_bytes(word)
        })
        .collect()
}

/// Vulkan shader module wrapper.
pub struct ShaderModule {
    device: Arc<DeviceContext>,
    module: vk::ShaderModule,
    size: usize,
}

impl ShaderModule {
    /// Creates a shader module from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] for an empty byte sequence, and the
    /// Vulkan error if module creation fails.
    pub fn from_bytes(device: Arc<DeviceContext>, bytes: &[u8]) -> RhiResult<Self> {
        if bytes.is_empty() {
            return Err(RhiError::ShaderError("Shader byte code is empty".to_string()));
        }

        let code = to_code_words(bytes);
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        let module = unsafe {
            device
                .handle()
                .create_shader_module(&create_info, None)
                .context("create_shader_module")?
        };

        debug!("Created shader module ({} bytes)", bytes.len());

        Ok(Self {
            device,
            module,
            size: bytes.len(),
        })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Size of the byte code the module was created from.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed shader module");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_shader_bytes_reads_everything() {
        let source: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let bytes = read_shader_bytes(std::io::Cursor::new(source.clone())).unwrap();
        assert_eq!(bytes, source);
    }

    #[test]
    fn test_read_shader_bytes_empty_source() {
        let bytes = read_shader_bytes(std::io::empty()).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_code_words_pad_trailing_bytes() {
        let words = to_code_words(&[1, 2, 3, 4, 5]);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], u32::from_ne_bytes([1, 2, 3, 4]));
        assert_eq!(words[1], u32::from_ne_bytes([5, 0, 0, 0]));
    }

    #[test]
    fn test_code_words_keep_spirv_magic() {
        let magic = 0x0723_0203u32.to_ne_bytes();
        assert_eq!(to_code_words(&magic), vec![0x0723_0203]);
    }
}
