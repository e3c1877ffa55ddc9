// Vulkan rendering components

pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod vertex_layout;

pub use pipeline::{GraphicsPipeline, PipelineDesc, RenderPipelines};
pub use render_pass::RenderPass;
pub use shader::ShaderModule;
pub use vertex_layout::VertexLayout;
