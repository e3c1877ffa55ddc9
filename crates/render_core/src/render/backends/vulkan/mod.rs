//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering, and state modules.
//! Every object that owns Vulkan handles holds an `Arc<DeviceContext>`, so the
//! device outlives all of them and is destroyed last.

/// Error types shared by the backend
pub mod error;

/// Instance, surface, and device setup
pub mod initialization;

/// Buffers, images, command pools, and the bindless descriptor set
pub mod resources;

/// Shaders, render pass, and graphics pipelines
pub mod rendering;

/// Swapchain and its attachments
pub mod state;

pub use error::{ErrorKind, VulkanError, VulkanResult};
pub use initialization::{DeviceContext, DeviceLimits, Surface, SurfaceSupport, VulkanInstance};
pub use rendering::{GraphicsPipeline, PipelineDesc, RenderPass, RenderPipelines, ShaderModule, VertexLayout};
pub use resources::{Buffer, CommandPool, DescriptorContext, Image, ImageDesc, MappedBuffer, Sampler};
pub use state::SwapchainContext;
