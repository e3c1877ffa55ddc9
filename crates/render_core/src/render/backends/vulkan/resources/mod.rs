//! Vulkan resource management
//!
//! GPU memory-backed objects: buffers, images and samplers, command pools, and
//! the bindless descriptor context.

/// Buffers and persistently mapped buffers
pub mod buffer;

/// Command pool and one-time submission
pub mod commands;

/// Bindless descriptor layout, pool and per-frame sets
pub mod descriptor;

/// Images, views, layout transitions, mipmaps, samplers
pub mod image;

pub use buffer::{Buffer, MappedBuffer};
pub use commands::CommandPool;
pub use descriptor::{
    BindingSpec, DescriptorContext, DescriptorPoolPlan, BINDING_COUNT, MATERIAL_BINDING, MESH_BINDING,
    MESH_INSTANCE_BINDING, SAMPLER_BINDING, TEXTURE_BINDING, UBO_BINDING,
};
pub use image::{Image, ImageDesc, Sampler};
