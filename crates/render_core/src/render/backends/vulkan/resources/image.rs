//! GPU images, their views, and samplers
//!
//! An [`Image`] owns its memory and every view derived from it. Views are
//! appended with [`Image::create_view`] and addressed by index; they are only
//! destroyed together with the image, before the image and its memory.
//!
//! Layout changes go through a deliberately small rule table
//! ([`transition_rule`]). Mipmap generation follows a fixed per-level plan
//! ([`mip_chain_steps`]) that is recorded into one one-time command buffer.

use ash::vk;
use std::sync::Arc;

use super::{CommandPool, MappedBuffer};
use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// Everything needed to create an [`Image`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Samples per texel
    pub samples: vk::SampleCountFlags,
    /// Texel format
    pub format: vk::Format,
    /// Tiling
    pub tiling: vk::ImageTiling,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Memory properties for the backing allocation
    pub properties: vk::MemoryPropertyFlags,
}

impl ImageDesc {
    /// Single-sampled, optimally tiled, device-local 2D image
    pub fn new(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }

    /// Sampled texture with a full mip chain
    pub fn texture(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            mip_levels: mip_level_count(width, height),
            ..Self::new(
                width,
                height,
                format,
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            )
        }
    }

    /// Set the sample count
    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }
}

/// GPU image with its memory and derived views
pub struct Image {
    context: Arc<DeviceContext>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    format: vk::Format,
    width: u32,
    height: u32,
    mip_levels: u32,
    views: Vec<vk::ImageView>,
}

impl Image {
    /// Create the image, allocate its memory and bind it, as one unit
    pub fn new(context: &Arc<DeviceContext>, desc: &ImageDesc) -> VulkanResult<Self> {
        let device = context.device();
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(desc.samples);

        let image = unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? };

        let memory = match Self::allocate_and_bind(context, image, desc.properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        log::debug!(
            "Created image {}x{} {:?}, {} mip levels, {:?}",
            desc.width,
            desc.height,
            desc.format,
            desc.mip_levels,
            desc.samples
        );

        Ok(Self {
            context: Arc::clone(context),
            image,
            memory,
            format: desc.format,
            width: desc.width,
            height: desc.height,
            mip_levels: desc.mip_levels,
            views: Vec::new(),
        })
    }

    fn allocate_and_bind(
        context: &DeviceContext,
        image: vk::Image,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let device = context.device();
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = context.find_memory_type(requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api)? };

        if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe { device.free_memory(memory, None) };
            return Err(VulkanError::Api(e));
        }
        Ok(memory)
    }

    /// Create a view over all mip levels and return its index
    pub fn create_view(&mut self, aspect: vk::ImageAspectFlags) -> VulkanResult<usize> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: self.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            self.context
                .device()
                .create_image_view(&view_info, None)
                .map_err(VulkanError::Api)?
        };
        self.views.push(view);
        Ok(self.views.len() - 1)
    }

    /// View created by the `index`-th call to [`Image::create_view`]
    pub fn view(&self, index: usize) -> Option<vk::ImageView> {
        self.views.get(index).copied()
    }

    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Width and height
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Move every mip level from `from` to `to`
    ///
    /// Only the pairs accepted by [`transition_rule`] are allowed.
    pub fn transition_layout(&self, pool: &CommandPool, from: vk::ImageLayout, to: vk::ImageLayout) -> VulkanResult<()> {
        let rule = transition_rule(from, to)?;
        let barrier = self.barrier(0, self.mip_levels, from, to, rule);

        pool.run_single_time(|device, cmd| {
            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    rule.src_stage,
                    rule.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            }
            Ok(())
        })
    }

    /// Copy tightly packed texels from `staging` into mip level 0
    ///
    /// The image must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_from_buffer(&self, pool: &CommandPool, staging: &MappedBuffer) -> VulkanResult<()> {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect_for_format(self.format),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            })
            .build();

        pool.run_single_time(|device, cmd| {
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle(),
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            Ok(())
        })
    }

    /// Fill mip levels 1.. from level 0 and leave every level shader-readable
    ///
    /// Every level must be in `TRANSFER_DST_OPTIMAL`, with level 0 holding data.
    pub fn generate_mipmaps(&self, pool: &CommandPool) -> VulkanResult<()> {
        let properties = self.context.format_properties(self.format);
        if !properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            log::error!("Format {:?} does not support linear blitting", self.format);
            return Err(VulkanError::UnsupportedFormat {
                format: self.format,
                reason: "linear filtering required for mipmap blits",
            });
        }

        let steps = mip_chain_steps(self.width, self.height, self.mip_levels);
        let aspect = aspect_for_format(self.format);

        pool.run_single_time(|device, cmd| {
            for step in &steps {
                match *step {
                    MipStep::Barrier { level, from, to } => {
                        let rule = mip_barrier_rule(from, to)?;
                        let barrier = self.barrier(level, 1, from, to, rule);
                        unsafe {
                            device.cmd_pipeline_barrier(
                                cmd,
                                rule.src_stage,
                                rule.dst_stage,
                                vk::DependencyFlags::empty(),
                                &[],
                                &[],
                                &[barrier],
                            );
                        }
                    }
                    MipStep::Blit { src_level, src_extent, dst_extent } => {
                        let blit = vk::ImageBlit::builder()
                            .src_offsets([
                                vk::Offset3D { x: 0, y: 0, z: 0 },
                                vk::Offset3D { x: src_extent.0, y: src_extent.1, z: 1 },
                            ])
                            .src_subresource(vk::ImageSubresourceLayers {
                                aspect_mask: aspect,
                                mip_level: src_level,
                                base_array_layer: 0,
                                layer_count: 1,
                            })
                            .dst_offsets([
                                vk::Offset3D { x: 0, y: 0, z: 0 },
                                vk::Offset3D { x: dst_extent.0, y: dst_extent.1, z: 1 },
                            ])
                            .dst_subresource(vk::ImageSubresourceLayers {
                                aspect_mask: aspect,
                                mip_level: src_level + 1,
                                base_array_layer: 0,
                                layer_count: 1,
                            })
                            .build();
                        unsafe {
                            device.cmd_blit_image(
                                cmd,
                                self.image,
                                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                                self.image,
                                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                                &[blit],
                                vk::Filter::LINEAR,
                            );
                        }
                    }
                }
            }
            Ok(())
        })?;

        log::debug!("Generated {} mip levels for {:?}", self.mip_levels, self.image);
        Ok(())
    }

    fn barrier(
        &self,
        base_mip_level: u32,
        level_count: u32,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
        rule: LayoutTransition,
    ) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .old_layout(from)
            .new_layout(to)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_for_format(self.format),
                base_mip_level,
                level_count,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(rule.src_access)
            .dst_access_mask(rule.dst_access)
            .build()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Access masks and pipeline stages for one layout change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Writes that must be available
    pub src_access: vk::AccessFlags,
    /// Accesses that wait
    pub dst_access: vk::AccessFlags,
    /// Stage producing the writes
    pub src_stage: vk::PipelineStageFlags,
    /// Stage consuming them
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for a whole-image transition
///
/// Only `UNDEFINED -> TRANSFER_DST_OPTIMAL` and
/// `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL` are legal.
pub fn transition_rule(from: vk::ImageLayout, to: vk::ImageLayout) -> VulkanResult<LayoutTransition> {
    match (from, to) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok(LayoutTransition {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        _ => {
            log::error!("Unsupported layout transition {:?} -> {:?}", from, to);
            Err(VulkanError::UnsupportedLayoutTransition { from, to })
        }
    }
}

/// Per-level barriers used inside the mip chain
fn mip_barrier_rule(from: vk::ImageLayout, to: vk::ImageLayout) -> VulkanResult<LayoutTransition> {
    match (from, to) {
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL) => Ok(LayoutTransition {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok(LayoutTransition {
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        _ => transition_rule(from, to),
    }
}

/// One recorded operation of the mip chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipStep {
    /// Layout change of a single level
    Barrier {
        /// Mip level
        level: u32,
        /// Current layout
        from: vk::ImageLayout,
        /// New layout
        to: vk::ImageLayout,
    },
    /// Downsample `src_level` into `src_level + 1`
    Blit {
        /// Source level
        src_level: u32,
        /// Source width and height
        src_extent: (i32, i32),
        /// Destination width and height
        dst_extent: (i32, i32),
    },
}

/// Ordered plan for filling an image's mip chain from level 0
///
/// Expects every level in `TRANSFER_DST_OPTIMAL` and leaves every level in
/// `SHADER_READ_ONLY_OPTIMAL`.
pub fn mip_chain_steps(width: u32, height: u32, mip_levels: u32) -> Vec<MipStep> {
    let mut steps = Vec::with_capacity(mip_levels as usize * 3);
    let mut mip_width = width.max(1) as i32;
    let mut mip_height = height.max(1) as i32;

    for level in 1..mip_levels {
        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);

        steps.push(MipStep::Barrier {
            level: level - 1,
            from: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            to: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        });
        steps.push(MipStep::Blit {
            src_level: level - 1,
            src_extent: (mip_width, mip_height),
            dst_extent: (next_width, next_height),
        });
        steps.push(MipStep::Barrier {
            level: level - 1,
            from: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            to: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });

        mip_width = next_width;
        mip_height = next_height;
    }

    if mip_levels > 0 {
        steps.push(MipStep::Barrier {
            level: mip_levels - 1,
            from: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            to: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });
    }
    steps
}

/// Levels in a full chain down to 1x1
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    u32::BITS - width.max(height).max(1).leading_zeros()
}

/// Aspect flags implied by a format
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Linear, repeating sampler with anisotropy when the device enables it
pub struct Sampler {
    context: Arc<DeviceContext>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create the global texture sampler
    pub fn new(context: &Arc<DeviceContext>) -> VulkanResult<Self> {
        let anisotropy = context.anisotropy_enabled();
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { context.limits().max_sampler_anisotropy.min(16.0) } else { 1.0 })
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = unsafe {
            context
                .device()
                .create_sampler(&sampler_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            context: Arc::clone(context),
            sampler,
        })
    }

    /// Sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::ErrorKind;

    #[test]
    fn test_supported_transitions() {
        let upload = transition_rule(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(upload.src_access, vk::AccessFlags::empty());
        assert_eq!(upload.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let sample = transition_rule(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(sample.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(sample.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_other_transitions_rejected() {
        let pairs = [
            (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::UNDEFINED),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::UNDEFINED),
        ];
        for (from, to) in pairs {
            let err = transition_rule(from, to).unwrap_err();
            assert!(matches!(err, VulkanError::UnsupportedLayoutTransition { .. }));
            assert_eq!(err.kind(), ErrorKind::LogicViolation);
        }
    }

    /// Replay a plan against per-level layouts, checking every barrier's source layout
    fn replay(steps: &[MipStep], levels: u32) -> (Vec<vk::ImageLayout>, usize) {
        let mut layouts = vec![vk::ImageLayout::TRANSFER_DST_OPTIMAL; levels as usize];
        let mut blits = 0;
        for step in steps {
            match *step {
                MipStep::Barrier { level, from, to } => {
                    assert_eq!(layouts[level as usize], from);
                    assert!(mip_barrier_rule(from, to).is_ok());
                    layouts[level as usize] = to;
                }
                MipStep::Blit { src_level, .. } => {
                    assert_eq!(layouts[src_level as usize], vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
                    assert_eq!(layouts[src_level as usize + 1], vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                    blits += 1;
                }
            }
        }
        (layouts, blits)
    }

    #[test]
    fn test_mip_chain_blit_count_and_final_layouts() {
        for (width, height) in [(1, 1), (2, 2), (256, 256), (300, 17)] {
            let levels = mip_level_count(width, height);
            let (layouts, blits) = replay(&mip_chain_steps(width, height, levels), levels);
            assert_eq!(blits, levels as usize - 1);
            assert!(layouts.iter().all(|&l| l == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
        }
    }

    #[test]
    fn test_mip_extents_halve_to_one() {
        let steps = mip_chain_steps(8, 2, 4);
        let extents: Vec<_> = steps
            .iter()
            .filter_map(|step| match step {
                MipStep::Blit { src_extent, dst_extent, .. } => Some((*src_extent, *dst_extent)),
                MipStep::Barrier { .. } => None,
            })
            .collect();
        assert_eq!(extents, vec![((8, 2), (4, 1)), ((4, 1), (2, 1)), ((2, 1), (1, 1))]);
    }

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(300, 17), 9);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(aspect_for_format(vk::Format::R8G8B8A8_SRGB), vk::ImageAspectFlags::COLOR);
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert!(aspect_for_format(vk::Format::D24_UNORM_S8_UINT).contains(vk::ImageAspectFlags::STENCIL));
    }
}
