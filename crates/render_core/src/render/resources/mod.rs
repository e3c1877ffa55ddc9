//! Renderer-owned resources built on the Vulkan backend

pub mod materials;
