//! Mesh registry
//!
//! Append-only table of every mesh uploaded to the shared vertex and index
//! buffers. Loading is deduplicated by source path, and write offsets only
//! advance the first time a path is seen.

use bitflags::bitflags;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::assets::{AssetError, MeshSource};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::primitives::Vertex;
use crate::render::resources::materials::{MaterialId, MaterialResolver};

/// Stable mesh identity; also the slot in the mesh storage buffer
pub type MeshId = u32;

bitflags! {
    /// Per-mesh properties visible to shaders
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MeshFlags: u32 {
        /// Material carries a diffuse map
        const TEXTURED = 1 << 0;
        /// At least one vertex has a non-zero normal
        const HAS_NORMALS = 1 << 1;
    }
}

/// Location of one mesh inside the shared buffers (binding 4 entry, std430)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshData {
    /// Base vertex added to every index
    pub vertex_offset: i32,
    /// First index in the shared index buffer
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
    /// Identity
    pub mesh_id: MeshId,
    /// Material the mesh was authored with
    pub default_material_id: MaterialId,
    flags: u32,
}

unsafe impl bytemuck::Pod for MeshData {}
unsafe impl bytemuck::Zeroable for MeshData {}

impl MeshData {
    /// Record for a mesh occupying `index_count` indices from `first_index`, based at `vertex_offset`
    pub const fn new(
        mesh_id: MeshId,
        vertex_offset: i32,
        first_index: u32,
        index_count: u32,
        default_material_id: MaterialId,
        flags: MeshFlags,
    ) -> Self {
        Self {
            vertex_offset,
            first_index,
            index_count,
            mesh_id,
            default_material_id,
            flags: flags.bits(),
        }
    }

    /// Property flags
    pub const fn flags(&self) -> MeshFlags {
        MeshFlags::from_bits_truncate(self.flags)
    }
}

/// Handle to a loaded mesh plus the material to draw it with
///
/// Plain value; holds no GPU state. Replace `material_id` to draw the mesh with
/// a different material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshInstance {
    /// Mesh to draw
    pub mesh_id: MeshId,
    /// Material to draw it with
    pub material_id: MaterialId,
}

/// Destination for uploaded geometry
///
/// Offsets are in elements, not bytes.
pub trait GeometrySink {
    /// Copy `vertices` starting at vertex `first_vertex`
    fn write_vertices(&mut self, first_vertex: u32, vertices: &[Vertex]) -> VulkanResult<()>;

    /// Copy `indices` starting at index `first_index`
    fn write_indices(&mut self, first_index: u32, indices: &[u32]) -> VulkanResult<()>;

    /// Store the record for `mesh` at slot `mesh.mesh_id`
    fn write_mesh(&mut self, mesh: &MeshData) -> VulkanResult<()>;
}

/// CPU side of the mesh table and shared-buffer write offsets
#[derive(Debug)]
pub struct MeshRegistry {
    meshes: Vec<MeshData>,
    by_path: HashMap<PathBuf, MeshId>,
    vertex_count: u32,
    index_count: u32,
    max_meshes: u32,
    max_vertices: u32,
    max_indices: u32,
}

impl MeshRegistry {
    /// Empty registry with fixed capacities
    pub fn new(max_meshes: u32, max_vertices: u32, max_indices: u32) -> Self {
        Self {
            meshes: Vec::with_capacity(max_meshes as usize),
            by_path: HashMap::new(),
            vertex_count: 0,
            index_count: 0,
            max_meshes,
            max_vertices,
            max_indices,
        }
    }

    /// Load the mesh at `path` once, returning the same instance on every later call
    ///
    /// The first load parses through `source`, resolves the material through
    /// `materials`, and copies the geometry into `sink` at the current offsets.
    /// Capacity is checked before anything is written, so a failed load leaves
    /// the registry and the sink untouched.
    pub fn load(
        &mut self,
        path: &Path,
        source: &mut dyn MeshSource,
        materials: &mut dyn MaterialResolver,
        sink: &mut dyn GeometrySink,
    ) -> VulkanResult<MeshInstance> {
        if let Some(instance) = self.lookup(path) {
            log::trace!("Mesh {:?} already loaded as {}", path, instance.mesh_id);
            return Ok(instance);
        }

        let loaded = source.load(path)?;
        if loaded.vertices.is_empty() || loaded.indices.is_empty() {
            return Err(AssetError::InvalidFormat(format!("{} has no geometry", path.display())).into());
        }

        let vertex_count = u32::try_from(loaded.vertices.len())
            .map_err(|_| VulkanError::capacity("vertices", loaded.vertices.len(), self.max_vertices as usize))?;
        let index_count = u32::try_from(loaded.indices.len())
            .map_err(|_| VulkanError::capacity("indices", loaded.indices.len(), self.max_indices as usize))?;
        self.check_capacity(vertex_count, index_count)?;

        let vertex_offset = i32::try_from(self.vertex_count)
            .map_err(|_| VulkanError::capacity("vertex offset", self.vertex_count as usize, i32::MAX as usize))?;

        let material_id = materials.resolve(&loaded.material)?;

        let mut flags = MeshFlags::empty();
        flags.set(MeshFlags::TEXTURED, loaded.material.diffuse_map.is_some());
        flags.set(
            MeshFlags::HAS_NORMALS,
            loaded.vertices.iter().any(|v| v.normal != [0.0; 3]),
        );

        let mesh = MeshData::new(
            self.meshes.len() as MeshId,
            vertex_offset,
            self.index_count,
            index_count,
            material_id,
            flags,
        );

        sink.write_vertices(self.vertex_count, &loaded.vertices)?;
        sink.write_indices(self.index_count, &loaded.indices)?;
        sink.write_mesh(&mesh)?;

        self.vertex_count += vertex_count;
        self.index_count += index_count;
        self.meshes.push(mesh);
        self.by_path.insert(path.to_path_buf(), mesh.mesh_id);

        log::debug!(
            "Loaded mesh {} from {:?}: {} vertices, {} indices, material {}",
            mesh.mesh_id,
            path,
            vertex_count,
            index_count,
            material_id
        );
        Ok(MeshInstance {
            mesh_id: mesh.mesh_id,
            material_id,
        })
    }

    fn check_capacity(&self, vertices: u32, indices: u32) -> VulkanResult<()> {
        if self.meshes.len() >= self.max_meshes as usize {
            return Err(VulkanError::capacity("meshes", self.meshes.len() + 1, self.max_meshes as usize));
        }
        let vertex_end = u64::from(self.vertex_count) + u64::from(vertices);
        if vertex_end > u64::from(self.max_vertices) {
            return Err(VulkanError::capacity("vertices", vertex_end as usize, self.max_vertices as usize));
        }
        let index_end = u64::from(self.index_count) + u64::from(indices);
        if index_end > u64::from(self.max_indices) {
            return Err(VulkanError::capacity("indices", index_end as usize, self.max_indices as usize));
        }
        Ok(())
    }

    /// Instance previously returned for `path`
    pub fn lookup(&self, path: &Path) -> Option<MeshInstance> {
        let mesh = self.meshes.get(*self.by_path.get(path)? as usize)?;
        Some(MeshInstance {
            mesh_id: mesh.mesh_id,
            material_id: mesh.default_material_id,
        })
    }

    /// Mesh record for `mesh_id`
    pub fn get(&self, mesh_id: MeshId) -> VulkanResult<&MeshData> {
        self.meshes.get(mesh_id as usize).ok_or_else(|| {
            log::error!("Mesh {} was never loaded", mesh_id);
            VulkanError::ResourceNotFound { id: u64::from(mesh_id) }
        })
    }

    /// Number of loaded meshes
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Whether no mesh has been loaded
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Vertices written so far; the next mesh's base vertex
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Indices written so far; the next mesh's first index
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{LoadedMesh, MaterialRef, ObjLoader};
    use crate::render::backends::vulkan::ErrorKind;

    /// Serves a quad (4 vertices, 6 indices) for every path and counts parses
    #[derive(Default)]
    struct QuadSource {
        loads: usize,
    }

    impl MeshSource for QuadSource {
        fn load(&mut self, path: &Path) -> Result<LoadedMesh, AssetError> {
            self.loads += 1;
            let vertex = Vertex::new([0.0; 3], [0.0, 0.0, 1.0], [0.0; 2]);
            Ok(LoadedMesh {
                vertices: vec![vertex; 4],
                indices: vec![0, 1, 2, 2, 3, 0],
                material: MaterialRef {
                    name: path.display().to_string(),
                    ..MaterialRef::default()
                },
            })
        }
    }

    /// Hands out sequential ids, deduplicating by name
    #[derive(Default)]
    struct NameResolver {
        names: Vec<String>,
    }

    impl MaterialResolver for NameResolver {
        fn resolve(&mut self, material: &MaterialRef) -> VulkanResult<MaterialId> {
            let index = match self.names.iter().position(|n| *n == material.name) {
                Some(index) => index,
                None => {
                    self.names.push(material.name.clone());
                    self.names.len() - 1
                }
            };
            Ok(index as MaterialId)
        }
    }

    /// Records write offsets instead of copying
    #[derive(Default)]
    struct RecordingSink {
        vertex_writes: Vec<(u32, usize)>,
        index_writes: Vec<(u32, usize)>,
        meshes: Vec<MeshData>,
    }

    impl GeometrySink for RecordingSink {
        fn write_vertices(&mut self, first_vertex: u32, vertices: &[Vertex]) -> VulkanResult<()> {
            self.vertex_writes.push((first_vertex, vertices.len()));
            Ok(())
        }

        fn write_indices(&mut self, first_index: u32, indices: &[u32]) -> VulkanResult<()> {
            self.index_writes.push((first_index, indices.len()));
            Ok(())
        }

        fn write_mesh(&mut self, mesh: &MeshData) -> VulkanResult<()> {
            self.meshes.push(*mesh);
            Ok(())
        }
    }

    fn load(
        registry: &mut MeshRegistry,
        path: &str,
        source: &mut QuadSource,
        sink: &mut RecordingSink,
    ) -> VulkanResult<MeshInstance> {
        registry.load(Path::new(path), source, &mut NameResolver::default(), sink)
    }

    #[test]
    fn test_same_path_loads_once() {
        let mut registry = MeshRegistry::new(8, 100, 100);
        let mut source = QuadSource::default();
        let mut sink = RecordingSink::default();

        let first = load(&mut registry, "cube.obj", &mut source, &mut sink).unwrap();
        let second = load(&mut registry, "cube.obj", &mut source, &mut sink).unwrap();

        assert_eq!(first, second);
        assert_eq!(source.loads, 1);
        assert_eq!(sink.vertex_writes.len(), 1);
        assert_eq!(registry.vertex_count(), 4);
        assert_eq!(registry.index_count(), 6);
    }

    #[test]
    fn test_distinct_paths_advance_offsets() {
        let mut registry = MeshRegistry::new(8, 100, 100);
        let mut source = QuadSource::default();
        let mut sink = RecordingSink::default();

        let a = load(&mut registry, "a.obj", &mut source, &mut sink).unwrap();
        let b = load(&mut registry, "b.obj", &mut source, &mut sink).unwrap();

        assert_eq!((a.mesh_id, b.mesh_id), (0, 1));
        assert_eq!(sink.vertex_writes, vec![(0, 4), (4, 4)]);
        assert_eq!(sink.index_writes, vec![(0, 6), (6, 6)]);

        let mesh = registry.get(b.mesh_id).unwrap();
        assert_eq!(mesh.vertex_offset, 4);
        assert_eq!(mesh.first_index, 6);
        assert_eq!(mesh.index_count, 6);
        assert!(mesh.flags().contains(MeshFlags::HAS_NORMALS));
        assert!(!mesh.flags().contains(MeshFlags::TEXTURED));
        assert_eq!(sink.meshes[1], *mesh);
    }

    #[test]
    fn test_vertex_capacity() {
        // Room for two quads' vertices but three quads' indices
        let mut registry = MeshRegistry::new(8, 8, 18);
        let mut source = QuadSource::default();
        let mut sink = RecordingSink::default();

        load(&mut registry, "a.obj", &mut source, &mut sink).unwrap();
        load(&mut registry, "b.obj", &mut source, &mut sink).unwrap();
        let err = load(&mut registry, "c.obj", &mut source, &mut sink).unwrap_err();

        assert!(matches!(err, VulkanError::CapacityExceeded { resource: "vertices", .. }));
        assert_eq!(err.kind(), ErrorKind::LogicViolation);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.vertex_count(), 8);
        assert_eq!(sink.vertex_writes.len(), 2);
    }

    #[test]
    fn test_index_and_mesh_capacity() {
        let mut source = QuadSource::default();
        let mut sink = RecordingSink::default();

        let mut registry = MeshRegistry::new(8, 100, 10);
        load(&mut registry, "a.obj", &mut source, &mut sink).unwrap();
        let err = load(&mut registry, "b.obj", &mut source, &mut sink).unwrap_err();
        assert!(matches!(err, VulkanError::CapacityExceeded { resource: "indices", .. }));

        let mut registry = MeshRegistry::new(1, 100, 100);
        load(&mut registry, "a.obj", &mut source, &mut sink).unwrap();
        let err = load(&mut registry, "b.obj", &mut source, &mut sink).unwrap_err();
        assert!(matches!(err, VulkanError::CapacityExceeded { resource: "meshes", .. }));
    }

    /// Serves one OBJ document for every path
    struct ObjText(&'static str);

    impl MeshSource for ObjText {
        fn load(&mut self, _path: &Path) -> Result<LoadedMesh, AssetError> {
            ObjLoader::parse(self.0, Path::new(""), |name| {
                Err(AssetError::InvalidFormat(format!("no library {name}")))
            })
        }
    }

    #[test]
    fn test_normal_flag_follows_obj_content() {
        let mut registry = MeshRegistry::new(8, 100, 100);
        let mut sink = RecordingSink::default();
        let mut resolver = NameResolver::default();

        let bare = registry
            .load(
                Path::new("bare.obj"),
                &mut ObjText("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n"),
                &mut resolver,
                &mut sink,
            )
            .unwrap();
        let flags = registry.get(bare.mesh_id).unwrap().flags();
        assert!(!flags.contains(MeshFlags::HAS_NORMALS));
        assert!(!flags.contains(MeshFlags::TEXTURED));

        let lit = registry
            .load(
                Path::new("lit.obj"),
                &mut ObjText("v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1\n"),
                &mut resolver,
                &mut sink,
            )
            .unwrap();
        assert!(registry.get(lit.mesh_id).unwrap().flags().contains(MeshFlags::HAS_NORMALS));
        assert_eq!(sink.meshes[0].flags(), flags);
    }

    #[test]
    fn test_unknown_mesh_not_found() {
        let mut registry = MeshRegistry::new(8, 100, 100);
        assert!(matches!(registry.get(0), Err(VulkanError::ResourceNotFound { id: 0 })));

        let mut source = QuadSource::default();
        let mut sink = RecordingSink::default();
        load(&mut registry, "a.obj", &mut source, &mut sink).unwrap();
        assert!(registry.get(0).is_ok());
        assert!(matches!(registry.get(1), Err(VulkanError::ResourceNotFound { id: 1 })));
    }

    #[test]
    fn test_mesh_data_layout() {
        assert_eq!(std::mem::size_of::<MeshData>(), 24);
    }
}
