//! # Rendering System
//!
//! GPU resource management and draw submission on Vulkan.
//!
//! ## Architecture
//!
//! - **Backend**: device, memory, images, buffers, descriptors, pipelines, swapchain
//! - **Resources**: materials and their textures
//! - **Systems**: mesh registry and per-frame indirect batching
//! - **Primitives**: vertex formats shared with the asset loaders

// Core primitives
pub mod primitives;

// Resources
pub mod resources;

// Systems
pub mod systems;

/// Graphics backend implementations
pub mod backends;

pub use primitives::{DebugVertex, Vertex};
pub use resources::materials::{MaterialData, MaterialId, MaterialManager, MaterialResolver};
pub use systems::batching::{DrawStats, MeshData, MeshId, MeshInstance, MeshManager};
