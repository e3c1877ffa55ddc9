//! Material manager: textures, material records, and their descriptor bindings
//!
//! Owns every material texture and the material storage buffer. Slot 0 of the
//! bindless array always holds a 1x1 white texture so untextured materials can
//! sample unconditionally.

use ash::vk;
use std::sync::Arc;

use super::{MaterialData, MaterialId, MaterialRegistry, MaterialResolver, DEFAULT_TEXTURE_SLOT};
use crate::assets::{ImageData, MaterialRef};
use crate::config::CapacityConfig;
use crate::render::backends::vulkan::{
    CommandPool, DescriptorContext, DeviceContext, Image, ImageDesc, MappedBuffer, VulkanError, VulkanResult,
};

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;
const WHITE: [u8; 4] = [255, 255, 255, 255];

/// GPU material store
pub struct MaterialManager {
    context: Arc<DeviceContext>,
    registry: MaterialRegistry,
    buffer: MappedBuffer,
    textures: Vec<Image>,
}

impl MaterialManager {
    /// Create the material buffer and default texture and bind both for every frame
    pub fn new(
        context: &Arc<DeviceContext>,
        capacities: &CapacityConfig,
        pool: &CommandPool,
        descriptors: &DescriptorContext,
    ) -> VulkanResult<Self> {
        let buffer_size = u64::from(capacities.max_materials) * std::mem::size_of::<MaterialData>() as u64;
        let buffer = MappedBuffer::new(context, buffer_size, vk::BufferUsageFlags::STORAGE_BUFFER)?;

        let mut manager = Self {
            context: Arc::clone(context),
            registry: MaterialRegistry::new(capacities.max_materials, capacities.max_textures),
            buffer,
            textures: Vec::new(),
        };

        let white = manager.create_texture(&ImageData::solid_color(1, 1, WHITE), pool)?;
        manager.bind_texture(white, DEFAULT_TEXTURE_SLOT, descriptors)?;

        for frame in 0..descriptors.frame_count() {
            descriptors.bind_material_buffer(manager.buffer.descriptor_info(), frame)?;
        }

        manager.load_or_get(&MaterialRef::default(), pool, descriptors)?;
        Ok(manager)
    }

    /// Id of `material`, loading its texture and writing its record on first use
    pub fn load_or_get(
        &mut self,
        material: &MaterialRef,
        pool: &CommandPool,
        descriptors: &DescriptorContext,
    ) -> VulkanResult<MaterialId> {
        if let Some(id) = self.registry.get(&material.name) {
            return Ok(id);
        }
        self.registry.ensure_capacity()?;

        let texture_index = match &material.diffuse_map {
            Some(path) => {
                let image_data = ImageData::from_file(path)?;
                // Slot is only taken once the texture is uploaded and bound
                let slot = self.registry.peek_texture_slot()?;
                let image = self.create_texture(&image_data, pool)?;
                self.bind_texture(image, slot, descriptors)?;
                self.registry.allocate_texture_slot()?;
                log::debug!("Loaded texture {:?} into slot {}", path, slot);
                slot
            }
            None => DEFAULT_TEXTURE_SLOT,
        };

        let data = MaterialData::new(material.base_color, texture_index);
        let id = self.registry.insert(&material.name, data)?;
        self.buffer.write(id as usize, &[data])?;

        log::info!("Material '{}' registered as {} (texture slot {})", material.name, id, texture_index);
        Ok(id)
    }

    /// Record of material `id`
    pub fn material(&self, id: MaterialId) -> VulkanResult<&MaterialData> {
        self.registry.record(id).ok_or_else(|| {
            log::error!("Material {} not found", id);
            VulkanError::ResourceNotFound { id: u64::from(id) }
        })
    }

    /// Number of registered materials
    pub fn material_count(&self) -> usize {
        self.registry.len()
    }

    /// Adapter passing `pool` and `descriptors` along to [`MaterialManager::load_or_get`]
    pub fn resolver<'a>(
        &'a mut self,
        pool: &'a CommandPool,
        descriptors: &'a DescriptorContext,
    ) -> MaterialBinder<'a> {
        MaterialBinder {
            manager: self,
            pool,
            descriptors,
        }
    }

    /// Upload `image_data` into a new mipmapped, shader-readable texture
    fn create_texture(&self, image_data: &ImageData, pool: &CommandPool) -> VulkanResult<Image> {
        let mut image = Image::new(
            &self.context,
            &ImageDesc::texture(image_data.width, image_data.height, TEXTURE_FORMAT),
        )?;

        let staging = MappedBuffer::staging(&self.context, &image_data.data)?;
        image.transition_layout(pool, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        image.copy_from_buffer(pool, &staging)?;
        image.generate_mipmaps(pool)?;
        image.create_view(vk::ImageAspectFlags::COLOR)?;
        Ok(image)
    }

    fn bind_texture(&mut self, image: Image, slot: u32, descriptors: &DescriptorContext) -> VulkanResult<()> {
        let view = image.view(0).ok_or_else(|| VulkanError::InvalidOperation {
            reason: "texture has no view".to_string(),
        })?;
        descriptors.bind_texture(slot, view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        self.textures.push(image);
        Ok(())
    }
}

/// [`MaterialResolver`] backed by a [`MaterialManager`]
pub struct MaterialBinder<'a> {
    manager: &'a mut MaterialManager,
    pool: &'a CommandPool,
    descriptors: &'a DescriptorContext,
}

impl MaterialResolver for MaterialBinder<'_> {
    fn resolve(&mut self, material: &MaterialRef) -> VulkanResult<MaterialId> {
        self.manager.load_or_get(material, self.pool, self.descriptors)
    }
}
