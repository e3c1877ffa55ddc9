//! Material records as the shaders see them

use crate::assets::MaterialRef;
use crate::render::backends::vulkan::VulkanResult;

/// Unique identifier for materials; index into the material storage buffer
pub type MaterialId = u32;

/// Bindless slot holding the 1x1 white texture
pub const DEFAULT_TEXTURE_SLOT: u32 = 0;

/// One entry of the material storage buffer (binding 3), std430 layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaterialData {
    /// Linear RGBA base color
    pub base_color: [f32; 4],
    /// Slot in the bindless texture array
    pub texture_index: u32,
    _pad: [u32; 3],
}

unsafe impl bytemuck::Pod for MaterialData {}
unsafe impl bytemuck::Zeroable for MaterialData {}

impl MaterialData {
    /// Create a material record
    pub const fn new(base_color: [f32; 4], texture_index: u32) -> Self {
        Self {
            base_color,
            texture_index,
            _pad: [0; 3],
        }
    }
}

/// Turns a material reference from a mesh file into a material identity
///
/// Implementations deduplicate: resolving the same material twice yields the
/// same id.
pub trait MaterialResolver {
    /// Load `material` if it is new and return its id
    fn resolve(&mut self, material: &MaterialRef) -> VulkanResult<MaterialId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_data_matches_std430() {
        assert_eq!(std::mem::size_of::<MaterialData>(), 32);
        let data = MaterialData::new([1.0, 0.5, 0.25, 1.0], 7);
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&data));
        assert_eq!(words[4], 7);
    }
}
