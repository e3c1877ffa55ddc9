//! Vertex formats shared by the CPU loaders and the GPU vertex stages
//!
//! Both types are `#[repr(C)]` and `Pod` so they can be copied byte-for-byte into
//! mapped vertex memory. Their pipeline input descriptions live in the Vulkan
//! backend's `vertex_layout` module.

/// Vertex consumed by the main pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    /// Position in model space
    pub position: [f32; 3],
    /// Normal vector
    pub normal: [f32; 3],
    /// Texture coordinates
    pub tex_coord: [f32; 2],
}

// Only f32 arrays, no padding
unsafe impl bytemuck::Pod for Vertex {}
unsafe impl bytemuck::Zeroable for Vertex {}

impl Vertex {
    /// Create a new vertex
    pub const fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { position, normal, tex_coord }
    }
}

/// Vertex consumed by the debug line pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DebugVertex {
    /// Position in world space
    pub position: [f32; 3],
    /// Line color, RGBA
    pub color: [f32; 4],
}

unsafe impl bytemuck::Pod for DebugVertex {}
unsafe impl bytemuck::Zeroable for DebugVertex {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_sizes_have_no_padding() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<DebugVertex>(), 28);
    }

    #[test]
    fn test_vertex_bytes() {
        let v = Vertex::new([1.0, 2.0, 3.0], [0.0, 1.0, 0.0], [0.5, 0.5]);
        let bytes: &[u8] = bytemuck::bytes_of(&v);
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
    }
}
