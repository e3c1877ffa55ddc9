//! Bindless descriptor context
//!
//! One descriptor set layout with six fixed binding slots, one update-after-bind
//! pool, and one set per frame in flight. The slot numbers are part of the
//! shader interface:
//!
//! | slot | contents                     |
//! |------|------------------------------|
//! | 0    | camera uniform buffer        |
//! | 1    | global sampler               |
//! | 2    | bindless sampled-image array |
//! | 3    | material storage buffer      |
//! | 4    | mesh storage buffer          |
//! | 5    | mesh-instance storage buffer |
//!
//! Layout creation, pool sizing and descriptor writes all read the same
//! [`BindingSpec`] table, indexed by these constants.

use ash::vk;
use std::sync::Arc;

use crate::config::CapacityConfig;
use crate::render::backends::vulkan::{DeviceContext, DeviceLimits, VulkanError, VulkanResult};

/// Camera uniform buffer
pub const UBO_BINDING: u32 = 0;
/// Global sampler
pub const SAMPLER_BINDING: u32 = 1;
/// Bindless texture array
pub const TEXTURE_BINDING: u32 = 2;
/// Material records
pub const MATERIAL_BINDING: u32 = 3;
/// Mesh records
pub const MESH_BINDING: u32 = 4;
/// Per-frame instance records
pub const MESH_INSTANCE_BINDING: u32 = 5;
/// Number of binding slots in the layout
pub const BINDING_COUNT: usize = 6;

/// Layout description of one binding slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSpec {
    /// Slot index
    pub binding: u32,
    /// Descriptor type
    pub ty: vk::DescriptorType,
    /// Descriptors in the slot
    pub count: u32,
    /// Stages reading the slot
    pub stages: vk::ShaderStageFlags,
    /// Descriptor-indexing flags
    pub flags: vk::DescriptorBindingFlags,
}

/// The binding table, indexed by the `*_BINDING` constants
pub fn binding_specs(capacities: &CapacityConfig) -> [BindingSpec; BINDING_COUNT] {
    let bindless = vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
    [
        BindingSpec {
            binding: UBO_BINDING,
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
            flags: vk::DescriptorBindingFlags::empty(),
        },
        BindingSpec {
            binding: SAMPLER_BINDING,
            ty: vk::DescriptorType::SAMPLER,
            count: 1,
            stages: vk::ShaderStageFlags::FRAGMENT,
            flags: vk::DescriptorBindingFlags::empty(),
        },
        BindingSpec {
            binding: TEXTURE_BINDING,
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            count: capacities.max_textures,
            stages: vk::ShaderStageFlags::FRAGMENT,
            flags: bindless,
        },
        BindingSpec {
            binding: MATERIAL_BINDING,
            ty: vk::DescriptorType::STORAGE_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::FRAGMENT,
            flags: bindless,
        },
        BindingSpec {
            binding: MESH_BINDING,
            ty: vk::DescriptorType::STORAGE_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
            flags: bindless,
        },
        BindingSpec {
            binding: MESH_INSTANCE_BINDING,
            ty: vk::DescriptorType::STORAGE_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
            flags: bindless,
        },
    ]
}

/// Validated pool sizes for `frames` copies of the binding table
#[derive(Debug, Clone)]
pub struct DescriptorPoolPlan {
    /// One entry per descriptor type, summed over slots and multiplied by frames
    pub sizes: Vec<vk::DescriptorPoolSize>,
    /// Number of sets the pool hands out
    pub max_sets: u32,
}

impl DescriptorPoolPlan {
    /// Size the pool, rejecting tables the device cannot hold
    pub fn new(specs: &[BindingSpec; BINDING_COUNT], frames: u32, limits: &DeviceLimits) -> VulkanResult<Self> {
        let textures = specs[TEXTURE_BINDING as usize].count;
        let sampled_image_limit = limits.sampled_image_limit();
        if textures > sampled_image_limit {
            log::error!("{} bindless textures exceed the device limit of {}", textures, sampled_image_limit);
            return Err(VulkanError::DeviceLimitExceeded {
                what: "bindless sampled images",
                requested: u64::from(textures),
                limit: u64::from(sampled_image_limit),
            });
        }

        let total: u64 = specs.iter().map(|spec| u64::from(spec.count)).sum();
        if total > u64::from(limits.max_per_set_descriptors) {
            log::error!(
                "{} descriptors per set exceed the device limit of {}",
                total,
                limits.max_per_set_descriptors
            );
            return Err(VulkanError::DeviceLimitExceeded {
                what: "descriptors per set",
                requested: total,
                limit: u64::from(limits.max_per_set_descriptors),
            });
        }

        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::with_capacity(BINDING_COUNT);
        for spec in specs {
            let count = spec.count.saturating_mul(frames);
            match sizes.iter_mut().find(|size| size.ty == spec.ty) {
                Some(size) => size.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: spec.ty,
                    descriptor_count: count,
                }),
            }
        }

        Ok(Self { sizes, max_sets: frames })
    }
}

/// Texture slots must lie inside the bindless array
pub fn check_texture_slot(slot: u32, max_textures: u32) -> VulkanResult<()> {
    if slot < max_textures {
        Ok(())
    } else {
        Err(VulkanError::capacity("texture slots", slot as usize + 1, max_textures as usize))
    }
}

/// Descriptor set layout, pool and per-frame sets
pub struct DescriptorContext {
    context: Arc<DeviceContext>,
    specs: [BindingSpec; BINDING_COUNT],
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorContext {
    /// Validate the binding table against the device, then create the layout, pool and sets
    pub fn new(context: &Arc<DeviceContext>, capacities: &CapacityConfig) -> VulkanResult<Self> {
        let specs = binding_specs(capacities);
        let frames = capacities.max_frames_in_flight;
        let plan = DescriptorPoolPlan::new(&specs, frames, context.limits())?;

        let mut this = Self {
            context: Arc::clone(context),
            specs,
            layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
        };
        // Any early return below drops `this`, destroying whatever was created
        this.layout = this.create_layout()?;
        this.pool = this.create_pool(&plan)?;
        this.sets = this.allocate_sets(frames)?;

        log::debug!(
            "Descriptor context ready: {} frames, {} texture slots",
            frames,
            specs[TEXTURE_BINDING as usize].count
        );
        Ok(this)
    }

    fn create_layout(&self) -> VulkanResult<vk::DescriptorSetLayout> {
        let bindings = self.specs.map(|spec| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(spec.binding)
                .descriptor_type(spec.ty)
                .descriptor_count(spec.count)
                .stage_flags(spec.stages)
                .build()
        });
        let flags = self.specs.map(|spec| spec.flags);

        let mut binding_flags = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&flags)
            .build();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut binding_flags);

        unsafe {
            self.context
                .device()
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_pool(&self, plan: &DescriptorPoolPlan) -> VulkanResult<vk::DescriptorPool> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&plan.sizes)
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(plan.max_sets);

        unsafe {
            self.context
                .device()
                .create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn allocate_sets(&self, frames: u32) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![self.layout; frames as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        unsafe {
            self.context
                .device()
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Layout shared by every pipeline
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Number of per-frame sets
    pub fn frame_count(&self) -> usize {
        self.sets.len()
    }

    /// Descriptor set of `frame`
    pub fn set(&self, frame: usize) -> VulkanResult<vk::DescriptorSet> {
        self.sets.get(frame).copied().ok_or_else(|| {
            log::error!("Frame {} out of range ({} frames in flight)", frame, self.sets.len());
            VulkanError::InvalidOperation {
                reason: format!("frame {frame} out of range"),
            }
        })
    }

    /// Write the camera uniform buffer of `frame` into slot 0
    pub fn bind_uniform_buffer(&self, info: vk::DescriptorBufferInfo, frame: usize) -> VulkanResult<()> {
        self.write_buffer(UBO_BINDING, info, frame)
    }

    /// Write `sampler` into slot 1 of every frame's set
    pub fn bind_sampler(&self, sampler: vk::Sampler) -> VulkanResult<()> {
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::UNDEFINED,
        }];
        let writes: Vec<vk::WriteDescriptorSet> = self
            .sets
            .iter()
            .map(|&set| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(SAMPLER_BINDING)
                    .descriptor_type(self.spec(SAMPLER_BINDING).ty)
                    .image_info(&image_info)
                    .build()
            })
            .collect();
        unsafe { self.context.device().update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    /// Write one element of the bindless texture array in every frame's set
    ///
    /// # Concurrency
    /// Must not be called while any submitted frame using these sets may still
    /// execute on the GPU. Callers serialize texture streaming against frame
    /// submission.
    pub fn bind_texture(&self, slot: u32, view: vk::ImageView, layout: vk::ImageLayout) -> VulkanResult<()> {
        let spec = self.spec(TEXTURE_BINDING);
        check_texture_slot(slot, spec.count)?;

        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: layout,
        }];
        let writes: Vec<vk::WriteDescriptorSet> = self
            .sets
            .iter()
            .map(|&set| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(TEXTURE_BINDING)
                    .dst_array_element(slot)
                    .descriptor_type(spec.ty)
                    .image_info(&image_info)
                    .build()
            })
            .collect();
        unsafe { self.context.device().update_descriptor_sets(&writes, &[]) };
        log::trace!("Bound texture slot {}", slot);
        Ok(())
    }

    /// Point slot 3 of `frame` at the material buffer
    ///
    /// # Concurrency
    /// The set of `frame` must not be in use by the GPU.
    pub fn bind_material_buffer(&self, info: vk::DescriptorBufferInfo, frame: usize) -> VulkanResult<()> {
        self.write_buffer(MATERIAL_BINDING, info, frame)
    }

    /// Point slot 4 of `frame` at the mesh buffer
    ///
    /// # Concurrency
    /// The set of `frame` must not be in use by the GPU.
    pub fn bind_mesh_buffer(&self, info: vk::DescriptorBufferInfo, frame: usize) -> VulkanResult<()> {
        self.write_buffer(MESH_BINDING, info, frame)
    }

    /// Point slot 5 of `frame` at that frame's instance buffer
    ///
    /// # Concurrency
    /// The set of `frame` must not be in use by the GPU.
    pub fn bind_instance_buffer(&self, info: vk::DescriptorBufferInfo, frame: usize) -> VulkanResult<()> {
        self.write_buffer(MESH_INSTANCE_BINDING, info, frame)
    }

    fn write_buffer(&self, binding: u32, info: vk::DescriptorBufferInfo, frame: usize) -> VulkanResult<()> {
        let set = self.set(frame)?;
        let buffer_info = [info];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(self.spec(binding).ty)
            .buffer_info(&buffer_info)
            .build();
        unsafe { self.context.device().update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    fn spec(&self, binding: u32) -> BindingSpec {
        self.specs[binding as usize]
    }
}

impl Drop for DescriptorContext {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            // Destroying the pool frees its sets
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::ErrorKind;

    fn limits(sampled_images: u32, per_set: u32) -> DeviceLimits {
        DeviceLimits {
            max_per_stage_sampled_images: sampled_images,
            max_set_sampled_images: sampled_images,
            max_per_set_descriptors: per_set,
            max_bound_descriptor_sets: 4,
            color_sample_counts: vk::SampleCountFlags::TYPE_1,
            depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            max_sampler_anisotropy: 1.0,
        }
    }

    fn capacities(max_textures: u32, frames: u32) -> CapacityConfig {
        CapacityConfig {
            max_textures,
            max_frames_in_flight: frames,
            ..CapacityConfig::default()
        }
    }

    #[test]
    fn test_binding_table_indexed_by_constants() {
        let specs = binding_specs(&capacities(64, 2));
        for (index, spec) in specs.iter().enumerate() {
            assert_eq!(spec.binding as usize, index);
        }
        assert_eq!(specs[TEXTURE_BINDING as usize].count, 64);
        assert_eq!(specs[UBO_BINDING as usize].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(specs[MESH_INSTANCE_BINDING as usize].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert!(specs[TEXTURE_BINDING as usize]
            .flags
            .contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND));
        assert!(specs[UBO_BINDING as usize].flags.is_empty());
    }

    #[test]
    fn test_pool_sized_per_frame() {
        let specs = binding_specs(&capacities(100, 3));
        let plan = DescriptorPoolPlan::new(&specs, 3, &limits(1000, 1000)).unwrap();

        assert_eq!(plan.max_sets, 3);
        let count = |ty| plan.sizes.iter().find(|size| size.ty == ty).map(|size| size.descriptor_count);
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), Some(3));
        assert_eq!(count(vk::DescriptorType::SAMPLER), Some(3));
        assert_eq!(count(vk::DescriptorType::SAMPLED_IMAGE), Some(300));
        assert_eq!(count(vk::DescriptorType::STORAGE_BUFFER), Some(9));
    }

    #[test]
    fn test_pool_rejects_too_many_textures() {
        let specs = binding_specs(&capacities(2048, 2));
        let err = DescriptorPoolPlan::new(&specs, 2, &limits(1024, 100_000)).unwrap_err();
        assert!(matches!(err, VulkanError::DeviceLimitExceeded { what: "bindless sampled images", .. }));
        assert_eq!(err.kind(), ErrorKind::FatalConfiguration);
    }

    #[test]
    fn test_pool_rejects_too_many_descriptors_per_set() {
        // 100 textures + 5 single descriptors
        let specs = binding_specs(&capacities(100, 2));
        assert!(DescriptorPoolPlan::new(&specs, 2, &limits(1000, 105)).is_ok());
        let err = DescriptorPoolPlan::new(&specs, 2, &limits(1000, 104)).unwrap_err();
        assert!(matches!(
            err,
            VulkanError::DeviceLimitExceeded { what: "descriptors per set", requested: 105, limit: 104 }
        ));
    }

    #[test]
    fn test_texture_slot_bounds() {
        assert!(check_texture_slot(0, 1).is_ok());
        assert!(check_texture_slot(1023, 1024).is_ok());
        assert!(matches!(
            check_texture_slot(1024, 1024),
            Err(VulkanError::CapacityExceeded { requested: 1025, capacity: 1024, .. })
        ));
    }
}
