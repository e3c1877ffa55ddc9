//! Device and memory context
//!
//! [`DeviceContext`] owns the logical device and everything the other
//! components ask of it: queues, memory-type selection, format support, and the
//! device limits used to validate configured capacities. It is created once and
//! handed to every resource constructor as an `Arc<DeviceContext>`.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device, Instance};
use std::collections::HashSet;
use std::ffi::CStr;
use std::sync::Arc;

use crate::config::RendererConfig;
use crate::render::backends::vulkan::{Surface, VulkanError, VulkanInstance, VulkanResult};

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Device limits the renderer validates its configuration against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLimits {
    /// `maxPerStageDescriptorUpdateAfterBindSampledImages`; the bindless layout is update-after-bind
    pub max_per_stage_sampled_images: u32,
    /// `maxDescriptorSetUpdateAfterBindSampledImages`
    pub max_set_sampled_images: u32,
    /// `maxPerSetDescriptors` (Maintenance3)
    pub max_per_set_descriptors: u32,
    /// `maxBoundDescriptorSets`
    pub max_bound_descriptor_sets: u32,
    /// Sample counts usable for color attachments
    pub color_sample_counts: vk::SampleCountFlags,
    /// Sample counts usable for depth attachments
    pub depth_sample_counts: vk::SampleCountFlags,
    /// `maxSamplerAnisotropy`
    pub max_sampler_anisotropy: f32,
}

impl DeviceLimits {
    /// Gather the limits from queried device properties
    pub fn from_properties(
        limits: &vk::PhysicalDeviceLimits,
        maintenance3: &vk::PhysicalDeviceMaintenance3Properties,
        indexing: &vk::PhysicalDeviceDescriptorIndexingProperties,
    ) -> Self {
        Self {
            max_per_stage_sampled_images: indexing.max_per_stage_descriptor_update_after_bind_sampled_images,
            max_set_sampled_images: indexing.max_descriptor_set_update_after_bind_sampled_images,
            max_per_set_descriptors: maintenance3.max_per_set_descriptors,
            max_bound_descriptor_sets: limits.max_bound_descriptor_sets,
            color_sample_counts: limits.framebuffer_color_sample_counts,
            depth_sample_counts: limits.framebuffer_depth_sample_counts,
            max_sampler_anisotropy: limits.max_sampler_anisotropy,
        }
    }

    /// Largest bindless sampled-image array a single set may hold
    pub fn sampled_image_limit(&self) -> u32 {
        self.max_per_stage_sampled_images.min(self.max_set_sampled_images)
    }

    /// Highest sample count both color and depth attachments support, capped at `max_samples`
    pub fn choose_sample_count(&self, max_samples: u32) -> vk::SampleCountFlags {
        choose_sample_count(self.color_sample_counts & self.depth_sample_counts, max_samples)
    }
}

/// Highest sample count in `supported` that does not exceed `max_samples`
pub fn choose_sample_count(supported: vk::SampleCountFlags, max_samples: u32) -> vk::SampleCountFlags {
    [
        (64, vk::SampleCountFlags::TYPE_64),
        (32, vk::SampleCountFlags::TYPE_32),
        (16, vk::SampleCountFlags::TYPE_16),
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
    ]
    .into_iter()
    .find(|&(count, flag)| count <= max_samples && supported.contains(flag))
    .map_or(vk::SampleCountFlags::TYPE_1, |(_, flag)| flag)
}

/// Index of the first memory type allowed by `type_filter` that has every `required` property
pub fn select_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        (type_filter & (1 << i)) != 0
            && memory_properties.memory_types[i as usize].property_flags.contains(required)
    })
}

/// Names of the descriptor-indexing features bindless rendering needs but the device lacks
pub fn missing_indexing_features(features: &vk::PhysicalDeviceDescriptorIndexingFeatures) -> Vec<&'static str> {
    [
        ("descriptorBindingPartiallyBound", features.descriptor_binding_partially_bound),
        (
            "descriptorBindingSampledImageUpdateAfterBind",
            features.descriptor_binding_sampled_image_update_after_bind,
        ),
        (
            "descriptorBindingStorageBufferUpdateAfterBind",
            features.descriptor_binding_storage_buffer_update_after_bind,
        ),
        ("runtimeDescriptorArray", features.runtime_descriptor_array),
        (
            "shaderSampledImageArrayNonUniformIndexing",
            features.shader_sampled_image_array_non_uniform_indexing,
        ),
    ]
    .into_iter()
    .filter(|&(_, supported)| supported != vk::TRUE)
    .map(|(name, _)| name)
    .collect()
}

/// Physical device chosen for rendering
struct PhysicalDeviceInfo {
    device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    limits: DeviceLimits,
    graphics_family: u32,
    present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select the first suitable device, preferring discrete GPUs
    fn select(instance: &Instance, surface: &Surface) -> VulkanResult<Self> {
        let mut devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };
        devices.sort_by_key(|&device| {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
        });

        for device in devices {
            match Self::evaluate(instance, device, surface) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", unsafe {
                        CStr::from_ptr(info.properties.device_name.as_ptr()).to_string_lossy()
                    });
                    return Ok(info);
                }
                Err(e) => log::debug!("Skipping physical device {:?}: {}", device, e),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate(instance: &Instance, device: vk::PhysicalDevice, surface: &Surface) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            if graphics_family.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics_family = Some(index);
            }
            if present_family.is_none() && surface.supports_present(device, index)? {
                present_family = Some(index);
            }
            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let graphics_family = graphics_family
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;
        let present_family = present_family
            .ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device).map_err(VulkanError::Api)? };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed("Swapchain extension not supported".to_string()));
        }

        let mut indexing = vk::PhysicalDeviceDescriptorIndexingFeatures::default();
        let features = {
            let mut features2 = vk::PhysicalDeviceFeatures2::builder().push_next(&mut indexing);
            unsafe { instance.get_physical_device_features2(device, &mut features2) };
            features2.features
        };

        let missing = missing_indexing_features(&indexing);
        if !missing.is_empty() {
            return Err(VulkanError::InitializationFailed(format!(
                "Descriptor indexing features missing: {}",
                missing.join(", ")
            )));
        }
        if features.multi_draw_indirect != vk::TRUE || features.draw_indirect_first_instance != vk::TRUE {
            return Err(VulkanError::InitializationFailed(
                "Multi-draw indirect with first instance not supported".to_string(),
            ));
        }

        let mut maintenance3 = vk::PhysicalDeviceMaintenance3Properties::default();
        let mut indexing_limits = vk::PhysicalDeviceDescriptorIndexingProperties::default();
        {
            let mut properties2 = vk::PhysicalDeviceProperties2::builder()
                .push_next(&mut maintenance3)
                .push_next(&mut indexing_limits);
            unsafe { instance.get_physical_device_properties2(device, &mut properties2) };
        }

        Ok(Self {
            device,
            properties,
            features,
            limits: DeviceLimits::from_properties(&properties.limits, &maintenance3, &indexing_limits),
            graphics_family,
            present_family,
        })
    }
}

/// Logical device plus the physical-device facts the renderer relies on
pub struct DeviceContext {
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: DeviceLimits,
    anisotropy_enabled: bool,
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_family: u32,
    present_family: u32,
    sample_count: vk::SampleCountFlags,
    depth_format: vk::Format,
}

impl DeviceContext {
    /// Select a physical device able to render bindlessly to `surface` and create the logical device
    ///
    /// `instance` must outlive the returned context.
    pub fn new(instance: &VulkanInstance, surface: &Surface, config: &RendererConfig) -> VulkanResult<Arc<Self>> {
        let raw_instance = instance.instance();
        let physical = PhysicalDeviceInfo::select(raw_instance, surface)?;

        let unique_families: HashSet<u32> = [physical.graphics_family, physical.present_family].into_iter().collect();
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let anisotropy_enabled = physical.features.sampler_anisotropy == vk::TRUE;

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(anisotropy_enabled)
            .multi_draw_indirect(true)
            .draw_indirect_first_instance(true)
            .build();

        let mut indexing_features = vk::PhysicalDeviceDescriptorIndexingFeatures::builder()
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .runtime_descriptor_array(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features)
            .push_next(&mut indexing_features);

        let device = unsafe {
            raw_instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };
        let memory_properties = unsafe { raw_instance.get_physical_device_memory_properties(physical.device) };

        let sample_count = physical.limits.choose_sample_count(config.max_msaa_samples);

        let mut context = Self {
            instance: raw_instance.clone(),
            physical_device: physical.device,
            properties: physical.properties,
            memory_properties,
            limits: physical.limits,
            anisotropy_enabled,
            device,
            graphics_queue,
            present_queue,
            graphics_family: physical.graphics_family,
            present_family: physical.present_family,
            sample_count,
            depth_format: vk::Format::UNDEFINED,
        };
        // On failure `context` drops here and destroys the device
        context.depth_format = context.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        log::info!(
            "Device ready: {:?} MSAA, depth {:?}, {} sampled images per set, {} descriptors per set",
            context.sample_count,
            context.depth_format,
            context.limits.sampled_image_limit(),
            context.limits.max_per_set_descriptors
        );

        Ok(Arc::new(context))
    }

    /// Logical device function table
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Instance function table
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Selected physical device
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Physical device properties
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Limits used for capacity validation
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Whether anisotropic filtering was enabled on the device
    pub fn anisotropy_enabled(&self) -> bool {
        self.anisotropy_enabled
    }

    /// MSAA sample count for color and depth attachments
    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.sample_count
    }

    /// Depth attachment format
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Presentation queue
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Graphics queue family index
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    /// Presentation queue family index
    pub fn present_family(&self) -> u32 {
        self.present_family
    }

    /// Find a memory type with required properties
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        select_memory_type(&self.memory_properties, type_filter, properties).ok_or_else(|| {
            log::error!("No memory type matches filter {:#b} with {:?}", type_filter, properties);
            VulkanError::NoSuitableMemoryType
        })
    }

    /// Format support for the selected device
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// First candidate supporting `features` with `tiling`
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> VulkanResult<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let props = self.format_properties(format);
                match tiling {
                    vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                    _ => props.optimal_tiling_features.contains(features),
                }
            })
            .ok_or_else(|| VulkanError::InitializationFailed(format!("No supported format among {candidates:?}")))
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    #[test]
    fn test_select_memory_type_respects_filter_and_flags() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(select_memory_type(&props, 0b111, host), Some(2));
        assert_eq!(select_memory_type(&props, 0b011, host), None);
        assert_eq!(select_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
        assert_eq!(select_memory_type(&props, 0b110, vk::MemoryPropertyFlags::HOST_VISIBLE), Some(1));
    }

    #[test]
    fn test_choose_sample_count() {
        let supported = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4;
        assert_eq!(choose_sample_count(supported, 8), vk::SampleCountFlags::TYPE_4);
        assert_eq!(choose_sample_count(supported, 2), vk::SampleCountFlags::TYPE_2);
        assert_eq!(choose_sample_count(supported, 1), vk::SampleCountFlags::TYPE_1);
        assert_eq!(choose_sample_count(vk::SampleCountFlags::TYPE_1, 64), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_limits_from_properties() {
        // Plain limits lower than the update-after-bind ones must not cap the bindless array
        let limits = vk::PhysicalDeviceLimits {
            max_per_stage_descriptor_sampled_images: 16,
            max_descriptor_set_sampled_images: 96,
            max_bound_descriptor_sets: 8,
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        let maintenance3 = vk::PhysicalDeviceMaintenance3Properties {
            max_per_set_descriptors: 1024,
            ..Default::default()
        };

        let indexing = vk::PhysicalDeviceDescriptorIndexingProperties {
            max_per_stage_descriptor_update_after_bind_sampled_images: 4096,
            max_descriptor_set_update_after_bind_sampled_images: 2048,
            ..Default::default()
        };

        let device_limits = DeviceLimits::from_properties(&limits, &maintenance3, &indexing);
        assert_eq!(device_limits.sampled_image_limit(), 2048);
        assert_eq!(device_limits.max_per_set_descriptors, 1024);
        // No count above 1 is shared between color and depth
        assert_eq!(device_limits.choose_sample_count(8), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_missing_indexing_features() {
        let mut features = vk::PhysicalDeviceDescriptorIndexingFeatures::default();
        assert_eq!(missing_indexing_features(&features).len(), 5);

        features.descriptor_binding_partially_bound = vk::TRUE;
        features.descriptor_binding_sampled_image_update_after_bind = vk::TRUE;
        features.descriptor_binding_storage_buffer_update_after_bind = vk::TRUE;
        features.runtime_descriptor_array = vk::TRUE;
        assert_eq!(missing_indexing_features(&features), vec!["shaderSampledImageArrayNonUniformIndexing"]);

        features.shader_sampled_image_array_non_uniform_indexing = vk::TRUE;
        assert!(missing_indexing_features(&features).is_empty());
    }
}
