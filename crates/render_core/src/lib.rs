//! # Render Core
//!
//! GPU resource management and indirect draw batching on Vulkan.
//!
//! ## Features
//!
//! - **Device context**: physical device selection, memory types, device limits
//! - **Resources**: RAII images, buffers, persistently mapped buffers, samplers
//! - **Bindless descriptors**: one six-binding layout, one set per frame in flight
//! - **Pipelines**: multisampled forward pass with main and debug line pipelines
//! - **Swapchain**: presentable images, MSAA color and depth, full recreation
//! - **Mesh batching**: deduplicated mesh loading and one indirect multi-draw per frame
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use render_core::config::RendererConfig;
//! use render_core::render::backends::vulkan::*;
//! use render_core::render::{MaterialManager, MeshManager};
//! use render_core::assets::ObjLoader;
//!
//! let config = RendererConfig::default();
//! let instance = VulkanInstance::new(window.raw_display_handle(), &config.application_name, config.enable_validation)?;
//! let surface = Surface::new(&instance, &window)?;
//! let context = DeviceContext::new(&instance, &surface, &config)?;
//!
//! let swapchain = SwapchainContext::new(&context, &surface, window_extent)?;
//! let descriptors = DescriptorContext::new(&context, &config.capacities)?;
//! let pipelines = RenderPipelines::new(&context, swapchain.format().format, descriptors.layout(), &config.shaders)?;
//! let pool = CommandPool::new(&context)?;
//!
//! let mut materials = MaterialManager::new(&context, &config.capacities, &pool, &descriptors)?;
//! let mut meshes = MeshManager::new(&context, &config.capacities, &descriptors)?;
//! let cube = meshes.load_mesh("cube.obj", &mut ObjLoader, &mut materials.resolver(&pool, &descriptors))?;
//!
//! // Every frame, inside the render pass:
//! meshes.queue_draw(cube, &transform)?;
//! pipelines.main().bind(command_buffer, swapchain.extent());
//! let stats = meshes.draw(command_buffer, pipelines.main().layout(), &descriptors, frame)?;
//! ```

pub mod assets;
pub mod config;
pub mod foundation;
pub mod render;
