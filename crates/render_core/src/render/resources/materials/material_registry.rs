//! CPU-side material bookkeeping
//!
//! Tracks material identities by name, the records mirrored into the material
//! storage buffer, and which bindless texture slots are taken.

use std::collections::HashMap;

use super::{MaterialData, MaterialId, DEFAULT_TEXTURE_SLOT};
use crate::render::backends::vulkan::resources::descriptor::check_texture_slot;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Name-deduplicated material table with texture slot allocation
#[derive(Debug)]
pub struct MaterialRegistry {
    by_name: HashMap<String, MaterialId>,
    records: Vec<MaterialData>,
    max_materials: u32,
    next_texture_slot: u32,
    max_textures: u32,
}

impl MaterialRegistry {
    /// Empty registry; texture slot 0 is reserved for the default texture
    pub fn new(max_materials: u32, max_textures: u32) -> Self {
        Self {
            by_name: HashMap::new(),
            records: Vec::with_capacity(max_materials as usize),
            max_materials,
            next_texture_slot: DEFAULT_TEXTURE_SLOT + 1,
            max_textures,
        }
    }

    /// Id of an already registered material
    pub fn get(&self, name: &str) -> Option<MaterialId> {
        self.by_name.get(name).copied()
    }

    /// Record of material `id`
    pub fn record(&self, id: MaterialId) -> Option<&MaterialData> {
        self.records.get(id as usize)
    }

    /// Every record, indexed by id
    pub fn records(&self) -> &[MaterialData] {
        &self.records
    }

    /// Number of registered materials
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no material is registered
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fail if one more material would not fit
    pub fn ensure_capacity(&self) -> VulkanResult<()> {
        if self.records.len() < self.max_materials as usize {
            Ok(())
        } else {
            Err(VulkanError::capacity(
                "materials",
                self.records.len() + 1,
                self.max_materials as usize,
            ))
        }
    }

    /// Slot the next [`allocate_texture_slot`](Self::allocate_texture_slot) will
    /// return, without taking it
    pub fn peek_texture_slot(&self) -> VulkanResult<u32> {
        check_texture_slot(self.next_texture_slot, self.max_textures)?;
        Ok(self.next_texture_slot)
    }

    /// Take the next free bindless texture slot
    pub fn allocate_texture_slot(&mut self) -> VulkanResult<u32> {
        let slot = self.peek_texture_slot()?;
        self.next_texture_slot += 1;
        Ok(slot)
    }

    /// Register a new material under `name`
    pub fn insert(&mut self, name: &str, data: MaterialData) -> VulkanResult<MaterialId> {
        if let Some(existing) = self.get(name) {
            log::error!("Material '{}' registered twice", name);
            return Err(VulkanError::InvalidOperation {
                reason: format!("material '{name}' already registered as {existing}"),
            });
        }
        self.ensure_capacity()?;

        let id = self.records.len() as MaterialId;
        self.records.push(data);
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_and_deduplicated_by_name() {
        let mut registry = MaterialRegistry::new(4, 4);
        let a = registry.insert("a", MaterialData::new([1.0; 4], 0)).unwrap();
        let b = registry.insert("b", MaterialData::new([0.5; 4], 1)).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(registry.get("b"), Some(1));
        assert_eq!(registry.record(1).map(|r| r.texture_index), Some(1));
        assert!(registry.insert("a", MaterialData::default()).is_err());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_material_capacity() {
        let mut registry = MaterialRegistry::new(1, 4);
        registry.insert("only", MaterialData::default()).unwrap();
        assert!(matches!(
            registry.insert("more", MaterialData::default()),
            Err(VulkanError::CapacityExceeded { resource: "materials", .. })
        ));
    }

    #[test]
    fn test_texture_slots_skip_default_and_respect_capacity() {
        let mut registry = MaterialRegistry::new(8, 3);
        assert_eq!(registry.allocate_texture_slot().unwrap(), 1);
        assert_eq!(registry.allocate_texture_slot().unwrap(), 2);
        assert!(registry.allocate_texture_slot().is_err());
    }

    #[test]
    fn test_peeked_slot_stays_free_until_allocated() {
        let mut registry = MaterialRegistry::new(8, 3);
        assert_eq!(registry.peek_texture_slot().unwrap(), 1);
        // An upload that fails after peeking leaves the slot for the next texture
        assert_eq!(registry.peek_texture_slot().unwrap(), 1);
        assert_eq!(registry.allocate_texture_slot().unwrap(), 1);
        assert_eq!(registry.peek_texture_slot().unwrap(), 2);
        assert_eq!(registry.allocate_texture_slot().unwrap(), 2);
        assert!(matches!(
            registry.peek_texture_slot(),
            Err(VulkanError::CapacityExceeded { .. })
        ));
    }
}
