//! Graphics backend implementations
//!
//! Vulkan is the only backend.

/// Vulkan rendering backend implementation
pub mod vulkan;
