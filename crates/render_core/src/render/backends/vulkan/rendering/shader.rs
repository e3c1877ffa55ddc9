//! SPIR-V shader modules
//!
//! Shader binaries are opaque: they are read, checked for SPIR-V framing, and
//! handed to the driver. Modules only need to live until pipeline creation.

use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// Entry point every stage uses
pub const SHADER_ENTRY_POINT: &CStr = match CStr::from_bytes_with_nul(b"main\0") {
    Ok(name) => name,
    Err(_) => panic!("entry point literal is not NUL-terminated"),
};

/// Decode SPIR-V bytes into words, validating size and magic number
pub fn decode_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VulkanError::InitializationFailed(format!("Invalid SPIR-V: {e}")))
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    context: Arc<DeviceContext>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(context: &Arc<DeviceContext>, bytes: &[u8]) -> VulkanResult<Self> {
        let code = decode_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe {
            context
                .device()
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            context: Arc::clone(context),
            module,
        })
    }

    /// Load shader from SPIR-V file
    pub fn from_file<P: AsRef<Path>>(context: &Arc<DeviceContext>, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| {
            log::error!("Failed to read shader {:?}: {}", path, source);
            VulkanError::ShaderUnavailable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        log::debug!("Loaded shader {:?} ({} bytes)", path, bytes.len());
        Self::from_bytes(context, &bytes)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description for pipeline creation
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(SHADER_ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_decode_spirv() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(decode_spirv(&bytes).unwrap(), words);
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let bytes = SPIRV_MAGIC.to_le_bytes();
        assert!(decode_spirv(&bytes[..3]).is_err());
    }

    #[test]
    fn test_entry_point() {
        assert_eq!(SHADER_ENTRY_POINT.to_bytes(), b"main");
    }
}
