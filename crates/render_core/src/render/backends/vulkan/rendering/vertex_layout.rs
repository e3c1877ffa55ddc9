//! Vulkan vertex input descriptions for the vertex formats in `render::primitives`
//!
//! Kept beside the pipelines so the primitive types stay free of Vulkan types.

use ash::vk;
use std::mem::{offset_of, size_of};

use crate::render::primitives::{DebugVertex, Vertex};

/// Binding and attribute descriptions for one vertex type
pub trait VertexLayout {
    /// Attributes read from binding 0
    const ATTRIBUTE_COUNT: usize;

    /// Per-vertex binding 0
    fn binding_description() -> vk::VertexInputBindingDescription;

    /// Attribute locations in declaration order
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription>;
}

fn attribute(location: u32, format: vk::Format, offset: usize) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        binding: 0,
        location,
        format,
        offset: offset as u32,
    }
}

impl VertexLayout for Vertex {
    const ATTRIBUTE_COUNT: usize = 3;

    fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, tex_coord)),
        ]
    }
}

impl VertexLayout for DebugVertex {
    const ATTRIBUTE_COUNT: usize = 2;

    fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(DebugVertex, position)),
            attribute(1, vk::Format::R32G32B32A32_SFLOAT, offset_of!(DebugVertex, color)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(Vertex::binding_description().stride, 32);
        let offsets: Vec<u32> = Vertex::attribute_descriptions().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(Vertex::attribute_descriptions().len(), Vertex::ATTRIBUTE_COUNT);
    }

    #[test]
    fn test_debug_vertex_layout() {
        assert_eq!(DebugVertex::binding_description().stride, 28);
        let attributes = DebugVertex::attribute_descriptions();
        assert_eq!(attributes.len(), DebugVertex::ATTRIBUTE_COUNT);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].format, vk::Format::R32G32B32A32_SFLOAT);
    }
}
