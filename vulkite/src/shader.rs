use std::path::Path;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateShaderModuleError {
    #[error("Failed to read shader binary: {0}")]
    Io(#[from] std::io::Error),

    #[error("SPIR-V byte length ({0}) is not a multiple of 4")]
    InvalidLength(usize),

    #[error("Vulkan error creating shader module: {0}")]
    Vulkan(vk::Result),
}

/// The single pipeline stage a shader module's entry point is compiled for.
///
/// Unlike `vk::ShaderStageFlags`, this can only name one stage at a time,
/// matching the semantics of one entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => {
                vk::ShaderStageFlags::TESSELLATION_EVALUATION
            }
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        }
    }
}

/// An owned `VkShaderModule` wrapping one compiled SPIR-V binary.
pub struct ShaderModule {
    parent: Arc<Device>,
    handle: vk::ShaderModule,
}

impl std::fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl ShaderModule {
    /// Create a shader module from raw SPIR-V bytes.
    ///
    /// The length must be a multiple of 4. Unaligned input is copied into
    /// properly aligned storage.
    pub fn from_spirv_bytes(
        device: &Arc<Device>,
        spirv_bytes: &[u8],
    ) -> Result<Self, CreateShaderModuleError> {
        if spirv_bytes.len() % 4 != 0 {
            return Err(CreateShaderModuleError::InvalidLength(spirv_bytes.len()));
        }

        // Reinterpret bytes as u32 words, borrowing when already aligned.
        // SPIR-V is defined little-endian, so the copy path decodes with
        // from_le_bytes; the borrow path is only reached on little-endian
        // targets where native and SPIR-V byte order agree.
        //
        //SAFETY: u32 has no invalid bit patterns and the length is a
        //multiple of 4, so the reinterpretation is sound.
        let (prefix, aligned_words, _suffix) = unsafe { spirv_bytes.align_to::<u32>() };
        let owned;
        let code: &[u32] = if prefix.is_empty() {
            aligned_words
        } else {
            owned = spirv_bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
                .collect::<Vec<u32>>();
            &owned
        };

        let create_info = vk::ShaderModuleCreateInfo::default().code(code);

        //SAFETY: create_info contains valid SPIR-V code words.
        let handle = unsafe { device.create_raw_shader_module(&create_info) }
            .map_err(CreateShaderModuleError::Vulkan)?;

        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    /// Create a shader module from a compiled SPIR-V binary on disk.
    pub fn from_spirv_file(
        device: &Arc<Device>,
        path: impl AsRef<Path>,
    ) -> Result<Self, CreateShaderModuleError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        tracing::debug!("Loaded shader binary {} ({} bytes)", path.display(), bytes.len());
        Self::from_spirv_bytes(device, &bytes)
    }

    pub fn raw_handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        tracing::debug!("Dropping shader module {:?}", self.handle);
        //SAFETY: The handle was created from parent; pipelines built from
        //this module hold Arc references and are dropped first.
        unsafe { self.parent.destroy_raw_shader_module(self.handle) };
    }
}
