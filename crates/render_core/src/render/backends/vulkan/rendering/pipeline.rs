//! Graphics pipelines
//!
//! Two fixed pipelines share the forward render pass and the bindless set
//! layout: the main triangle pipeline and a line-list pipeline for debug
//! wireframes. Viewport and scissor are dynamic, so neither pipeline depends on
//! the swapchain extent.

use ash::vk;
use std::sync::Arc;

use super::{RenderPass, ShaderModule, VertexLayout};
use crate::config::ShaderPaths;
use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};
use crate::render::primitives::{DebugVertex, Vertex};

/// Fixed-function state that differs between pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineDesc {
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Alpha blending on the color attachment
    pub alpha_blend: bool,
    /// Depth test with `LESS`
    pub depth_test: bool,
    /// Depth writes
    pub depth_write: bool,
}

impl PipelineDesc {
    /// Alpha-blended, back-face-culled triangles
    pub const fn main() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            alpha_blend: true,
            depth_test: true,
            depth_write: true,
        }
    }

    /// Opaque line list
    pub const fn debug_lines() -> Self {
        Self {
            topology: vk::PrimitiveTopology::LINE_LIST,
            alpha_blend: false,
            ..Self::main()
        }
    }

    /// Color attachment blend state
    pub fn color_blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let builder = vk::PipelineColorBlendAttachmentState::builder().color_write_mask(vk::ColorComponentFlags::RGBA);
        if self.alpha_blend {
            builder
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            builder.blend_enable(false).build()
        }
    }
}

/// Pipeline and its layout, with RAII cleanup
pub struct GraphicsPipeline {
    context: Arc<DeviceContext>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build a pipeline for vertex type `V`
    ///
    /// The shader modules may be dropped once this returns.
    pub fn new<V: VertexLayout>(
        context: &Arc<DeviceContext>,
        render_pass: &RenderPass,
        set_layout: vk::DescriptorSetLayout,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        desc: &PipelineDesc,
    ) -> VulkanResult<Self> {
        let device = context.device();

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None).map_err(VulkanError::Api)? };

        // Owns `layout` from here on
        let mut this = Self {
            context: Arc::clone(context),
            pipeline: vk::Pipeline::null(),
            layout,
        };

        let stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let bindings = [V::binding_description()];
        let attributes = V::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        // Counts only; the rectangles are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(context.sample_count())
            .min_sample_shading(1.0);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false);

        let blend_attachments = [desc.color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments)
            .blend_constants([0.0; 4]);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.handle())
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        this.pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("Driver returned no pipeline".to_string()))?;

        log::debug!("Created graphics pipeline {:?} ({:?})", this.pipeline, desc.topology);
        Ok(this)
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Bind the pipeline and set viewport and scissor to cover `extent`
    pub fn bind(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let device = self.context.device();
        unsafe {
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Forward render pass with the main and debug pipelines
pub struct RenderPipelines {
    main: GraphicsPipeline,
    debug: GraphicsPipeline,
    // Declared last so it is dropped after the pipelines using it
    render_pass: RenderPass,
}

impl RenderPipelines {
    /// Load the four shader binaries and build both pipelines
    ///
    /// A missing or unreadable shader is fatal.
    pub fn new(
        context: &Arc<DeviceContext>,
        color_format: vk::Format,
        set_layout: vk::DescriptorSetLayout,
        shaders: &ShaderPaths,
    ) -> VulkanResult<Self> {
        let render_pass = RenderPass::new_forward_pass(context, color_format)?;

        let main = {
            let vertex = ShaderModule::from_file(context, &shaders.main_vertex)?;
            let fragment = ShaderModule::from_file(context, &shaders.main_fragment)?;
            GraphicsPipeline::new::<Vertex>(context, &render_pass, set_layout, &vertex, &fragment, &PipelineDesc::main())?
        };

        let debug = {
            let vertex = ShaderModule::from_file(context, &shaders.debug_vertex)?;
            let fragment = ShaderModule::from_file(context, &shaders.debug_fragment)?;
            GraphicsPipeline::new::<DebugVertex>(
                context,
                &render_pass,
                set_layout,
                &vertex,
                &fragment,
                &PipelineDesc::debug_lines(),
            )?
        };

        log::info!("Graphics pipelines ready");
        Ok(Self { main, debug, render_pass })
    }

    /// Forward render pass
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Triangle pipeline
    pub fn main(&self) -> &GraphicsPipeline {
        &self.main
    }

    /// Debug line pipeline
    pub fn debug(&self) -> &GraphicsPipeline {
        &self.debug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_pipeline_state() {
        let desc = PipelineDesc::main();
        assert_eq!(desc.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(desc.cull_mode, vk::CullModeFlags::BACK);
        assert!(desc.depth_test && desc.depth_write);

        let blend = desc.color_blend_attachment();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blend.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(blend.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
    }

    #[test]
    fn test_debug_pipeline_state() {
        let desc = PipelineDesc::debug_lines();
        assert_eq!(desc.topology, vk::PrimitiveTopology::LINE_LIST);
        assert_eq!(desc.color_blend_attachment().blend_enable, vk::FALSE);
        assert_eq!(desc.color_blend_attachment().color_write_mask, vk::ColorComponentFlags::RGBA);
        assert!(desc.depth_test);
    }
}
