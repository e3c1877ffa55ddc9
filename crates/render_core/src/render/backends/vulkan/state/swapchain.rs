//! Swapchain context
//!
//! Owns the presentable image chain plus the multisampled color and depth
//! attachments and one framebuffer per swapchain image. On resize or an
//! out-of-date signal the whole set is destroyed and rebuilt; nothing is reused.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;
use std::sync::Arc;

use crate::render::backends::vulkan::rendering::RenderPass;
use crate::render::backends::vulkan::{
    DeviceContext, Image, ImageDesc, Surface, SurfaceSupport, VulkanError, VulkanResult,
};

/// Preferred format, with sRGB output
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    let preferred = available.iter().find(|format| {
        format.format == vk::Format::B8G8R8A8_SRGB && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    match (preferred, available.first()) {
        (Some(format), _) => Ok(*format),
        (None, Some(format)) => {
            log::warn!("Preferred surface format unavailable, using {:?}", format.format);
            Ok(*format)
        }
        (None, None) => Err(VulkanError::InitializationFailed("Surface reports no formats".to_string())),
    }
}

/// `MAILBOX` when available, otherwise the always-supported `FIFO`
pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    available
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface extent, or the window size clamped to the surface limits when the surface leaves it open
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, within the maximum (0 means unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Everything rebuilt together on recreation
struct SwapchainResources {
    context: Arc<DeviceContext>,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    color: Image,
    depth: Image,
}

impl SwapchainResources {
    fn new(
        context: &Arc<DeviceContext>,
        loader: &SwapchainLoader,
        surface: &Surface,
        support: &SurfaceSupport,
        format: vk::SurfaceFormatKHR,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let capabilities = &support.capabilities;
        let families = [context.graphics_family(), context.present_family()];
        let concurrent = families[0] != families[1];

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(choose_image_count(capabilities))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(if concurrent { vk::SharingMode::CONCURRENT } else { vk::SharingMode::EXCLUSIVE })
            .queue_family_indices(if concurrent { &families[..] } else { &[] })
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(choose_present_mode(&support.present_modes))
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? };

        // Attachments first so a failure there only has the swapchain to undo
        let attachments = Self::create_attachments(context, format.format, extent);
        let (color, depth) = match attachments {
            Ok(pair) => pair,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        let mut resources = Self {
            context: Arc::clone(context),
            loader: loader.clone(),
            swapchain,
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            color,
            depth,
        };
        resources.images = unsafe { loader.get_swapchain_images(swapchain).map_err(VulkanError::Api)? };
        for index in 0..resources.images.len() {
            let view = resources.create_view(resources.images[index], format.format)?;
            resources.views.push(view);
        }
        Ok(resources)
    }

    fn create_attachments(
        context: &Arc<DeviceContext>,
        color_format: vk::Format,
        extent: vk::Extent2D,
    ) -> VulkanResult<(Image, Image)> {
        let samples = context.sample_count();

        let mut color = Image::new(
            context,
            &ImageDesc::new(
                extent.width,
                extent.height,
                color_format,
                vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            )
            .samples(samples),
        )?;
        color.create_view(vk::ImageAspectFlags::COLOR)?;

        let mut depth = Image::new(
            context,
            &ImageDesc::new(
                extent.width,
                extent.height,
                context.depth_format(),
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .samples(samples),
        )?;
        depth.create_view(vk::ImageAspectFlags::DEPTH)?;

        Ok((color, depth))
    }

    fn create_view(&self, image: vk::Image, format: vk::Format) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe {
            self.context
                .device()
                .create_image_view(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_framebuffers(&mut self, render_pass: &RenderPass, extent: vk::Extent2D) -> VulkanResult<()> {
        let (Some(color_view), Some(depth_view)) = (self.color.view(0), self.depth.view(0)) else {
            return Err(VulkanError::InvalidOperation {
                reason: "swapchain attachments have no views".to_string(),
            });
        };

        for index in 0..self.views.len() {
            // Order matches the render pass attachment indices
            let attachments = [color_view, depth_view, self.views[index]];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.handle())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe {
                self.context
                    .device()
                    .create_framebuffer(&framebuffer_info, None)
                    .map_err(VulkanError::Api)?
            };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }
}

impl Drop for SwapchainResources {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        // `color` and `depth` drop after this, releasing their views first
    }
}

/// Presentable image chain with its attachments and framebuffers
pub struct SwapchainContext {
    context: Arc<DeviceContext>,
    loader: SwapchainLoader,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    resources: Option<SwapchainResources>,
}

impl SwapchainContext {
    /// Create the swapchain and its color and depth attachments for `window_extent`
    ///
    /// Framebuffers are added by [`SwapchainContext::create_framebuffers`] once
    /// the render pass for [`SwapchainContext::format`] exists.
    pub fn new(context: &Arc<DeviceContext>, surface: &Surface, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        let loader = SwapchainLoader::new(context.instance(), context.device());
        let mut this = Self {
            context: Arc::clone(context),
            loader,
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            resources: None,
        };
        this.build(surface, window_extent)?;
        Ok(this)
    }

    fn build(&mut self, surface: &Surface, window_extent: vk::Extent2D) -> VulkanResult<()> {
        let support = surface.support(self.context.physical_device())?;
        let format = choose_surface_format(&support.formats)?;
        let extent = choose_extent(&support.capabilities, window_extent);

        let resources = SwapchainResources::new(&self.context, &self.loader, surface, &support, format, extent)?;
        log::info!(
            "Swapchain ready: {}x{} {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            resources.images.len()
        );

        self.format = format;
        self.extent = extent;
        self.resources = Some(resources);
        Ok(())
    }

    /// Create one framebuffer per swapchain image
    pub fn create_framebuffers(&mut self, render_pass: &RenderPass) -> VulkanResult<()> {
        let extent = self.extent;
        let resources = self.resources_mut()?;
        if !resources.framebuffers.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "framebuffers already created".to_string(),
            });
        }
        resources.create_framebuffers(render_pass, extent)
    }

    /// Destroy the swapchain and everything derived from it, then rebuild for `window_extent`
    ///
    /// Waits for the device to go idle first.
    pub fn recreate(
        &mut self,
        surface: &Surface,
        window_extent: vk::Extent2D,
        render_pass: &RenderPass,
    ) -> VulkanResult<()> {
        self.context.wait_idle()?;
        self.resources = None;
        log::debug!("Swapchain destroyed for recreation");

        self.build(surface, window_extent)?;
        self.create_framebuffers(render_pass)
    }

    fn resources(&self) -> VulkanResult<&SwapchainResources> {
        self.resources.as_ref().ok_or_else(Self::not_ready)
    }

    fn resources_mut(&mut self) -> VulkanResult<&mut SwapchainResources> {
        self.resources.as_mut().ok_or_else(Self::not_ready)
    }

    fn not_ready() -> VulkanError {
        log::error!("Swapchain used after a failed recreation");
        VulkanError::InvalidOperation {
            reason: "swapchain is not ready".to_string(),
        }
    }

    /// Swapchain handle
    pub fn handle(&self) -> VulkanResult<vk::SwapchainKHR> {
        Ok(self.resources()?.swapchain)
    }

    /// Swapchain extension loader
    pub fn loader(&self) -> &SwapchainLoader {
        &self.loader
    }

    /// Surface format of the presentable images
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.resources.as_ref().map_or(0, |r| r.images.len())
    }

    /// Presentable images
    pub fn images(&self) -> VulkanResult<&[vk::Image]> {
        Ok(&self.resources()?.images)
    }

    /// Multisampled color attachment
    pub fn color_image(&self) -> VulkanResult<&Image> {
        Ok(&self.resources()?.color)
    }

    /// Depth attachment
    pub fn depth_image(&self) -> VulkanResult<&Image> {
        Ok(&self.resources()?.depth)
    }

    /// Framebuffer targeting swapchain image `image_index`
    pub fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        let resources = self.resources()?;
        resources
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no framebuffer for swapchain image {image_index}"),
            })
    }

    /// Acquire the next image, signalling `semaphore`
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    /// `ERROR_OUT_OF_DATE_KHR` is returned as an error; callers recreate.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> VulkanResult<(u32, bool)> {
        let swapchain = self.handle()?;
        unsafe {
            self.loader
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
                .map_err(VulkanError::Api)
        }
    }

    /// Present `image_index` once `wait` is signalled; returns whether the swapchain is suboptimal
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> VulkanResult<bool> {
        let swapchains = [self.handle()?];
        let indices = [image_index];
        let wait_semaphores = [wait];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe {
            self.loader
                .queue_present(self.context.present_queue(), &present_info)
                .map_err(VulkanError::Api)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: u32, min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current,
                height: current,
            },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_surface_format() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]).unwrap(), srgb);
        assert_eq!(choose_surface_format(&[unorm]).unwrap(), unorm);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_choose_present_mode() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent() {
        let window = vk::Extent2D {
            width: 8000,
            height: 8,
        };
        assert_eq!(choose_extent(&capabilities(800, 2, 3), window).width, 800);

        let clamped = choose_extent(&capabilities(u32::MAX, 2, 3), window);
        assert_eq!((clamped.width, clamped.height), (4096, 16));
    }

    #[test]
    fn test_choose_image_count() {
        assert_eq!(choose_image_count(&capabilities(1, 2, 0)), 3);
        assert_eq!(choose_image_count(&capabilities(1, 2, 2)), 2);
        assert_eq!(choose_image_count(&capabilities(1, 2, 8)), 3);
    }
}
