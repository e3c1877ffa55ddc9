//! Command pool and one-time command submission
//!
//! Uploads, layout transitions and mipmap generation all record into a
//! throwaway command buffer that is submitted and waited on immediately.

use ash::vk;
use std::sync::Arc;

use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    context: Arc<DeviceContext>,
    command_pool: vk::CommandPool,
    queue: vk::Queue,
}

impl CommandPool {
    /// Create a resettable pool on the graphics queue family
    pub fn new(context: &Arc<DeviceContext>) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.graphics_family());

        let command_pool = unsafe {
            context
                .device()
                .create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            context: Arc::clone(context),
            command_pool,
            queue: context.graphics_queue(),
        })
    }

    /// Allocate primary command buffers, e.g. one per frame in flight
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.context
                .device()
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Record with `record`, submit to the graphics queue and wait until the queue is idle
    ///
    /// The command buffer is freed whether recording succeeds or not.
    pub fn run_single_time<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> VulkanResult<()>,
    {
        let device = self.context.device();
        let command_buffer = self
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("Driver returned no command buffer".to_string()))?;

        let result = self.record_and_submit(device, command_buffer, record);

        unsafe {
            device.free_command_buffers(self.command_pool, &[command_buffer]);
        }
        result
    }

    fn record_and_submit<F>(&self, device: &ash::Device, command_buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> VulkanResult<()>,
    {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        record(device, command_buffer)?;

        unsafe {
            device.end_command_buffer(command_buffer).map_err(VulkanError::Api)?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            device.queue_wait_idle(self.queue).map_err(VulkanError::Api)?;
        }

        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            let _ = device.device_wait_idle();
            // Frees every command buffer allocated from the pool
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}
