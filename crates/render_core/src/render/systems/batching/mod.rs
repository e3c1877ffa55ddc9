//! Mesh batching and indirect draw submission
//!
//! [`MeshRegistry`] and [`DrawBatcher`] hold the CPU-side rules and run without
//! a device; [`MeshManager`] connects them to mapped GPU buffers.

pub mod batcher;
pub mod mesh_manager;
pub mod registry;

pub use batcher::{DrawBatcher, DrawCommand, DrawStats, MeshInstanceData};
pub use mesh_manager::MeshManager;
pub use registry::{GeometrySink, MeshData, MeshFlags, MeshId, MeshInstance, MeshRegistry};
