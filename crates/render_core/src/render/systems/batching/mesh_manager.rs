//! GPU mesh manager
//!
//! Shared vertex and index buffers, the mesh storage buffer, and one instance
//! buffer plus one indirect command buffer per frame in flight. All of them are
//! persistently mapped and sized up front from [`CapacityConfig`].
//!
//! # Frame protocol
//!
//! Between draws, [`MeshManager::queue_draw`] accumulates instances. Then
//! [`MeshManager::draw`] for frame `f`:
//! 1. copies the grouped instances and the draw commands into frame `f`'s buffers
//! 2. points binding 5 of frame `f`'s descriptor set at its instance buffer
//! 3. binds the set and geometry and issues one indirect multi-draw
//! 4. clears the accumulated state
//!
//! The caller must ensure frame `f`'s previous submission has completed.

use ash::vk;
use nalgebra::Matrix4;
use std::path::Path;
use std::sync::Arc;

use super::batcher::{DrawBatcher, DrawCommand, DrawStats, MeshInstanceData};
use super::registry::{GeometrySink, MeshData, MeshId, MeshInstance, MeshRegistry};
use crate::assets::MeshSource;
use crate::config::CapacityConfig;
use crate::render::backends::vulkan::{DescriptorContext, DeviceContext, MappedBuffer, VulkanError, VulkanResult};
use crate::render::primitives::Vertex;
use crate::render::resources::materials::MaterialResolver;

fn buffer_size<T>(count: u32) -> vk::DeviceSize {
    u64::from(count) * std::mem::size_of::<T>() as vk::DeviceSize
}

/// Shared geometry and mesh records
struct GeometryBuffers {
    vertices: MappedBuffer,
    indices: MappedBuffer,
    meshes: MappedBuffer,
}

impl GeometrySink for GeometryBuffers {
    fn write_vertices(&mut self, first_vertex: u32, vertices: &[Vertex]) -> VulkanResult<()> {
        self.vertices.write(first_vertex as usize, vertices)
    }

    fn write_indices(&mut self, first_index: u32, indices: &[u32]) -> VulkanResult<()> {
        self.indices.write(first_index as usize, indices)
    }

    fn write_mesh(&mut self, mesh: &MeshData) -> VulkanResult<()> {
        self.meshes.write(mesh.mesh_id as usize, std::slice::from_ref(mesh))
    }
}

/// Buffers replicated per frame in flight
struct FrameBuffers {
    instances: MappedBuffer,
    commands: MappedBuffer,
}

/// Mesh registry, geometry upload, and per-frame indirect submission
pub struct MeshManager {
    context: Arc<DeviceContext>,
    registry: MeshRegistry,
    batcher: DrawBatcher,
    geometry: GeometryBuffers,
    frames: Vec<FrameBuffers>,
}

impl MeshManager {
    /// Allocate every buffer and bind the mesh storage buffer for all frames
    ///
    /// One set of per-frame buffers is created for each of the descriptor
    /// context's frames.
    pub fn new(
        context: &Arc<DeviceContext>,
        capacities: &CapacityConfig,
        descriptors: &DescriptorContext,
    ) -> VulkanResult<Self> {
        let max_draw_indirect = context.properties().limits.max_draw_indirect_count;
        if capacities.max_draw_commands > max_draw_indirect {
            log::error!(
                "max_draw_commands {} exceeds device limit {}",
                capacities.max_draw_commands,
                max_draw_indirect
            );
            return Err(VulkanError::DeviceLimitExceeded {
                what: "indirect draw count",
                requested: u64::from(capacities.max_draw_commands),
                limit: u64::from(max_draw_indirect),
            });
        }

        let geometry = GeometryBuffers {
            vertices: MappedBuffer::new(
                context,
                buffer_size::<Vertex>(capacities.max_vertices),
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )?,
            indices: MappedBuffer::new(
                context,
                buffer_size::<u32>(capacities.max_indices),
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?,
            meshes: MappedBuffer::new(
                context,
                buffer_size::<MeshData>(capacities.max_meshes),
                vk::BufferUsageFlags::STORAGE_BUFFER,
            )?,
        };

        let frames = (0..descriptors.frame_count())
            .map(|_| {
                Ok(FrameBuffers {
                    instances: MappedBuffer::new(
                        context,
                        buffer_size::<MeshInstanceData>(capacities.max_mesh_instances),
                        vk::BufferUsageFlags::STORAGE_BUFFER,
                    )?,
                    commands: MappedBuffer::new(
                        context,
                        buffer_size::<DrawCommand>(capacities.max_draw_commands),
                        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDIRECT_BUFFER,
                    )?,
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        for frame in 0..frames.len() {
            descriptors.bind_mesh_buffer(geometry.meshes.descriptor_info(), frame)?;
        }

        log::info!(
            "Mesh manager ready: {} vertices, {} indices, {} meshes, {} instances x {} frames",
            capacities.max_vertices,
            capacities.max_indices,
            capacities.max_meshes,
            capacities.max_mesh_instances,
            frames.len()
        );

        Ok(Self {
            context: Arc::clone(context),
            registry: MeshRegistry::new(capacities.max_meshes, capacities.max_vertices, capacities.max_indices),
            batcher: DrawBatcher::new(
                capacities.max_mesh_instances as usize,
                capacities.max_draw_commands as usize,
            ),
            geometry,
            frames,
        })
    }

    /// Load the mesh at `path`, uploading it on first use
    ///
    /// Repeated paths return the original instance without touching the
    /// buffers. Only call between frames, from the rendering thread.
    pub fn load_mesh(
        &mut self,
        path: impl AsRef<Path>,
        source: &mut dyn MeshSource,
        materials: &mut dyn MaterialResolver,
    ) -> VulkanResult<MeshInstance> {
        self.registry.load(path.as_ref(), source, materials, &mut self.geometry)
    }

    /// Mesh record for `mesh_id`
    pub fn get_mesh(&self, mesh_id: MeshId) -> VulkanResult<&MeshData> {
        self.registry.get(mesh_id)
    }

    /// Number of loaded meshes
    pub fn mesh_count(&self) -> usize {
        self.registry.len()
    }

    /// Queue `instance` for the next [`MeshManager::draw`]
    pub fn queue_draw(&mut self, instance: MeshInstance, transform: &Matrix4<f32>) -> VulkanResult<()> {
        let mesh = self.registry.get(instance.mesh_id)?;
        self.batcher.push(
            mesh,
            MeshInstanceData::new(transform, instance.mesh_id, instance.material_id),
        )
    }

    /// Counts queued since the last draw
    pub fn pending(&self) -> DrawStats {
        self.batcher.stats()
    }

    /// Record this frame's indirect draw into `command_buffer`
    ///
    /// Expects a render pass and a pipeline using `pipeline_layout` to be bound.
    /// Accumulated state is cleared whether or not recording succeeds.
    ///
    /// # Concurrency
    ///
    /// Rewrites frame `frame`'s buffers and descriptor binding 5; the GPU must
    /// be done with that frame's previous submission.
    pub fn draw(
        &mut self,
        command_buffer: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        descriptors: &DescriptorContext,
        frame: usize,
    ) -> VulkanResult<DrawStats> {
        let result = self.record(command_buffer, pipeline_layout, descriptors, frame);
        self.batcher.reset();
        result
    }

    fn record(
        &mut self,
        command_buffer: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        descriptors: &DescriptorContext,
        frame: usize,
    ) -> VulkanResult<DrawStats> {
        let frame_count = self.frames.len();
        let buffers = self.frames.get_mut(frame).ok_or_else(|| {
            log::error!("Draw for frame {} of {}", frame, frame_count);
            VulkanError::InvalidOperation {
                reason: format!("frame {frame} out of range ({frame_count} frames in flight)"),
            }
        })?;

        let stats = self.batcher.stats();
        let (instances, commands) = self.batcher.assemble();
        buffers.instances.write(0, instances)?;
        buffers.commands.write(0, commands)?;
        descriptors.bind_instance_buffer(buffers.instances.descriptor_info(), frame)?;

        let set = descriptors.set(frame)?;
        let device = self.context.device();
        unsafe {
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                0,
                &[set],
                &[],
            );
            device.cmd_bind_index_buffer(command_buffer, self.geometry.indices.handle(), 0, vk::IndexType::UINT32);
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.geometry.vertices.handle()], &[0]);
            if !commands.is_empty() {
                device.cmd_draw_indexed_indirect(
                    command_buffer,
                    buffers.commands.handle(),
                    0,
                    commands.len() as u32,
                    std::mem::size_of::<DrawCommand>() as u32,
                );
            }
        }

        log::trace!(
            "Frame {}: {} draw commands, {} instances",
            frame,
            stats.draw_commands,
            stats.instances
        );
        Ok(stats)
    }
}
