//! SPIR-V shader modules.
//!
//! Modules are compiled offline with `glslc` and only live until the
//! pipeline that uses them has been created.

use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

const ENTRY_POINT: &CStr = c"main";

/// Pipeline stage a module is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        })
    }
}

/// A loaded SPIR-V module and the stage it is meant for.
pub struct Shader {
    /// Device that created the module and outlives it.
    device: Arc<Device>,
    /// Vulkan shader module handle.
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Loads a compiled module from disk.
    ///
    /// # Errors
    ///
    /// [`RhiError::ShaderError`] naming `path` when the file is unreadable or
    /// not SPIR-V.
    pub fn from_spirv_file(device: Arc<Device>, path: &Path, stage: ShaderStage) -> RhiResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let code = decode_spirv(&bytes)
            .map_err(|e| RhiError::ShaderError(format!("{}: {}", path.display(), e)))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        // SAFETY: `code` is aligned SPIR-V whose magic number was checked.
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!("{} shader loaded from {}", stage, path.display());
        Ok(Self {
            device,
            module,
            stage,
        })
    }

    /// Stage description with the `main` entry point, for pipeline creation.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        // SAFETY: created from this device and destroyed once; pipelines do
        // not keep a reference to the module.
        unsafe { self.device.handle().destroy_shader_module(self.module, None) };
    }
}

/// Words of a SPIR-V blob. Length and magic number are checked.
fn decode_spirv(bytes: &[u8]) -> std::io::Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "empty SPIR-V module",
        ));
    }
    ash::util::read_spv(&mut Cursor::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_stage_flags_and_names() {
        assert_eq!(ShaderStage::Vertex.to_vk_stage(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ShaderStage::Vertex.to_string(), "vertex");
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn test_decode_little_endian_words() {
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        assert_eq!(decode_spirv(&bytes).unwrap(), vec![MAGIC, 0x0001_0000]);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(decode_spirv(&[]).is_err());
        assert!(decode_spirv(&[0u8; 5]).is_err());
    }
}
