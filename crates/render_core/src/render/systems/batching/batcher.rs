//! Per-frame draw batching
//!
//! Every queued instance is merged into the draw command of its mesh, so a
//! frame issues one indirect command per distinct mesh. Instances are grouped
//! by command when the frame is assembled, keeping each command's instance
//! range contiguous regardless of submission order. The table is rebuilt from
//! scratch every frame.

use nalgebra::Matrix4;
use std::collections::HashMap;

use super::registry::{MeshData, MeshId};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::resources::materials::MaterialId;

/// Indirect indexed draw, laid out as `VkDrawIndexedIndirectCommand`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawCommand {
    /// Indices per instance
    pub index_count: u32,
    /// Instances drawn
    pub instance_count: u32,
    /// First index in the shared index buffer
    pub first_index: u32,
    /// Base vertex
    pub vertex_offset: i32,
    /// First entry in the frame's instance buffer
    pub first_instance: u32,
}

unsafe impl bytemuck::Pod for DrawCommand {}
unsafe impl bytemuck::Zeroable for DrawCommand {}

/// Per-instance payload of the instance storage buffer (binding 5, std430)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeshInstanceData {
    /// Model matrix, column-major
    pub transform: [[f32; 4]; 4],
    /// Mesh drawn
    pub mesh_id: MeshId,
    /// Material used, overriding the mesh default
    pub material_id: MaterialId,
    _pad: [u32; 2],
}

unsafe impl bytemuck::Pod for MeshInstanceData {}
unsafe impl bytemuck::Zeroable for MeshInstanceData {}

impl MeshInstanceData {
    /// Instance record for `transform`
    pub fn new(transform: &Matrix4<f32>, mesh_id: MeshId, material_id: MaterialId) -> Self {
        Self {
            transform: (*transform).into(),
            mesh_id,
            material_id,
            _pad: [0; 2],
        }
    }
}

/// What one frame submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawStats {
    /// Indirect commands issued
    pub draw_commands: usize,
    /// Instances across all commands
    pub instances: usize,
}

/// Accumulates one frame's instances into indirect draw commands
#[derive(Debug)]
pub struct DrawBatcher {
    commands: Vec<DrawCommand>,
    grouped: Vec<Vec<MeshInstanceData>>,
    batch_table: HashMap<MeshId, usize>,
    flattened: Vec<MeshInstanceData>,
    instance_count: usize,
    max_instances: usize,
    max_commands: usize,
}

impl DrawBatcher {
    /// Empty batcher for at most `max_instances` instances in `max_commands` commands
    pub fn new(max_instances: usize, max_commands: usize) -> Self {
        Self {
            commands: Vec::with_capacity(max_commands),
            grouped: Vec::with_capacity(max_commands),
            batch_table: HashMap::with_capacity(max_commands),
            flattened: Vec::new(),
            instance_count: 0,
            max_instances,
            max_commands,
        }
    }

    /// Queue one instance of `mesh`
    ///
    /// Joins the mesh's existing command if it has one this frame, otherwise
    /// opens a new command.
    pub fn push(&mut self, mesh: &MeshData, instance: MeshInstanceData) -> VulkanResult<()> {
        if self.instance_count >= self.max_instances {
            return Err(VulkanError::capacity(
                "mesh instances",
                self.instance_count + 1,
                self.max_instances,
            ));
        }

        let index = match self.batch_table.get(&mesh.mesh_id) {
            Some(&index) => index,
            None => {
                if self.commands.len() >= self.max_commands {
                    return Err(VulkanError::capacity(
                        "draw commands",
                        self.commands.len() + 1,
                        self.max_commands,
                    ));
                }
                self.commands.push(DrawCommand {
                    index_count: mesh.index_count,
                    instance_count: 0,
                    first_index: mesh.first_index,
                    vertex_offset: mesh.vertex_offset,
                    first_instance: 0,
                });
                self.grouped.push(Vec::new());
                self.batch_table.insert(mesh.mesh_id, self.commands.len() - 1);
                self.commands.len() - 1
            }
        };

        self.commands[index].instance_count += 1;
        self.grouped[index].push(instance);
        self.instance_count += 1;
        Ok(())
    }

    /// Lay the frame out for upload: instances grouped by command, each
    /// command's `first_instance` pointing at its group
    pub fn assemble(&mut self) -> (&[MeshInstanceData], &[DrawCommand]) {
        self.flattened.clear();
        for (command, group) in self.commands.iter_mut().zip(&self.grouped) {
            command.first_instance = self.flattened.len() as u32;
            self.flattened.extend_from_slice(group);
        }
        (&self.flattened, &self.commands)
    }

    /// Queued counts
    pub fn stats(&self) -> DrawStats {
        DrawStats {
            draw_commands: self.commands.len(),
            instances: self.instance_count,
        }
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.instance_count == 0
    }

    /// Drop everything queued this frame
    pub fn reset(&mut self) {
        self.commands.clear();
        self.grouped.clear();
        self.batch_table.clear();
        self.flattened.clear();
        self.instance_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::ErrorKind;
    use crate::render::systems::batching::MeshFlags;
    use ash::vk;

    fn mesh(mesh_id: MeshId, first_index: u32, index_count: u32, vertex_offset: i32) -> MeshData {
        MeshData::new(mesh_id, vertex_offset, first_index, index_count, 0, MeshFlags::empty())
    }

    fn instance(mesh_id: MeshId, x: f32) -> MeshInstanceData {
        MeshInstanceData::new(&Matrix4::new_translation(&nalgebra::Vector3::new(x, 0.0, 0.0)), mesh_id, 0)
    }

    #[test]
    fn test_same_mesh_merges_into_one_command() {
        let cube = mesh(0, 0, 36, 0);
        let mut batcher = DrawBatcher::new(100, 10);
        for k in 0..5 {
            batcher.push(&cube, instance(0, k as f32)).unwrap();
        }

        let (instances, commands) = batcher.assemble();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].instance_count, 5);
        assert_eq!(commands[0].first_instance, 0);
        assert_eq!(instances.len(), 5);
    }

    #[test]
    fn test_distinct_meshes_get_own_commands() {
        let meshes = [mesh(0, 0, 36, 0), mesh(1, 36, 6, 24), mesh(2, 42, 3, 28)];
        let mut batcher = DrawBatcher::new(100, 10);
        for m in &meshes {
            batcher.push(m, instance(m.mesh_id, 0.0)).unwrap();
        }

        let (_, commands) = batcher.assemble();
        assert_eq!(commands.len(), 3);
        for (command, m) in commands.iter().zip(&meshes) {
            assert_eq!(command.first_index, m.first_index);
            assert_eq!(command.index_count, m.index_count);
            assert_eq!(command.vertex_offset, m.vertex_offset);
            assert_eq!(command.instance_count, 1);
        }
    }

    #[test]
    fn test_interleaved_instances_stay_contiguous() {
        let a = mesh(0, 0, 36, 0);
        let b = mesh(1, 36, 6, 24);
        let mut batcher = DrawBatcher::new(100, 10);
        batcher.push(&a, instance(0, 1.0)).unwrap();
        batcher.push(&b, instance(1, 2.0)).unwrap();
        batcher.push(&a, instance(0, 3.0)).unwrap();

        let (instances, commands) = batcher.assemble();
        assert_eq!((commands[0].first_instance, commands[0].instance_count), (0, 2));
        assert_eq!((commands[1].first_instance, commands[1].instance_count), (2, 1));

        let owners: Vec<MeshId> = instances.iter().map(|i| i.mesh_id).collect();
        assert_eq!(owners, vec![0, 0, 1]);
        approx::assert_relative_eq!(instances[1].transform[3][0], 3.0);
    }

    #[test]
    fn test_reset_empties_frame() {
        let cube = mesh(0, 0, 36, 0);
        let mut batcher = DrawBatcher::new(100, 10);
        for _ in 0..7 {
            batcher.push(&cube, instance(0, 0.0)).unwrap();
        }
        assert_eq!(batcher.stats(), DrawStats { draw_commands: 1, instances: 7 });

        batcher.reset();
        assert!(batcher.is_empty());
        assert_eq!(batcher.stats(), DrawStats::default());

        // The table is rebuilt, so the next frame starts a fresh command
        batcher.push(&cube, instance(0, 0.0)).unwrap();
        assert_eq!(batcher.assemble().1[0].instance_count, 1);
    }

    #[test]
    fn test_capacity_limits() {
        let mut batcher = DrawBatcher::new(2, 10);
        let cube = mesh(0, 0, 36, 0);
        batcher.push(&cube, instance(0, 0.0)).unwrap();
        batcher.push(&cube, instance(0, 0.0)).unwrap();
        let err = batcher.push(&cube, instance(0, 0.0)).unwrap_err();
        assert!(matches!(err, VulkanError::CapacityExceeded { resource: "mesh instances", .. }));
        assert_eq!(err.kind(), ErrorKind::LogicViolation);

        let mut batcher = DrawBatcher::new(10, 1);
        batcher.push(&cube, instance(0, 0.0)).unwrap();
        let err = batcher.push(&mesh(1, 36, 6, 24), instance(1, 0.0)).unwrap_err();
        assert!(matches!(err, VulkanError::CapacityExceeded { resource: "draw commands", .. }));
        assert_eq!(batcher.stats().instances, 1);
    }

    #[test]
    fn test_gpu_layouts() {
        assert_eq!(
            std::mem::size_of::<DrawCommand>(),
            std::mem::size_of::<vk::DrawIndexedIndirectCommand>()
        );
        assert_eq!(std::mem::size_of::<MeshInstanceData>(), 80);
    }
}
