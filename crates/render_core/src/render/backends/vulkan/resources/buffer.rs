//! Buffer management
//!
//! [`Buffer`] owns a `vk::Buffer` and its memory. [`MappedBuffer`] adds a
//! persistent host mapping created with the buffer and released with it; the
//! mapped bytes are only reachable through borrows of the owning value.

use ash::vk;
use bytemuck::Pod;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub struct Buffer {
    context: Arc<DeviceContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    ///
    /// Nothing is leaked if any step fails.
    pub fn new(
        context: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let device = context.device();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

        let memory = match Self::allocate_and_bind(context, buffer, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        log::trace!("Created buffer {:?} ({} bytes, {:?})", buffer, size, usage);
        Ok(Self {
            context: Arc::clone(context),
            buffer,
            memory,
            size,
        })
    }

    fn allocate_and_bind(
        context: &DeviceContext,
        buffer: vk::Buffer,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let device = context.device();
        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = context.find_memory_type(mem_requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api)? };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe { device.free_memory(memory, None) };
            return Err(VulkanError::Api(e));
        }
        Ok(memory)
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Descriptor info covering the whole buffer
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Host-visible, coherent buffer mapped for its whole lifetime
pub struct MappedBuffer {
    buffer: Buffer,
    mapped: NonNull<u8>,
}

impl MappedBuffer {
    /// Create and map a host-visible coherent buffer
    pub fn new(context: &Arc<DeviceContext>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        let buffer = Buffer::new(
            context,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        // `buffer` frees itself if mapping fails
        let ptr = unsafe {
            context
                .device()
                .map_memory(buffer.memory, 0, size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };
        let mapped = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| VulkanError::InitializationFailed("vkMapMemory returned null".to_string()))?;

        Ok(Self { buffer, mapped })
    }

    /// Staging buffer holding a copy of `bytes`
    pub fn staging(context: &Arc<DeviceContext>, bytes: &[u8]) -> VulkanResult<Self> {
        let mut staging = Self::new(
            context,
            bytes.len().max(1) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        staging.write(0, bytes)?;
        Ok(staging)
    }

    /// The mapped range as bytes
    pub fn bytes(&self) -> &[u8] {
        // The mapping spans `size` bytes and lives as long as `self`
        unsafe { std::slice::from_raw_parts(self.mapped.as_ptr(), self.len()) }
    }

    /// The mapped range as mutable bytes
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        unsafe { std::slice::from_raw_parts_mut(self.mapped.as_ptr(), len) }
    }

    /// Copy `data` into the buffer, starting `element_offset` elements of `T` in
    pub fn write<T: Pod>(&mut self, element_offset: usize, data: &[T]) -> VulkanResult<()> {
        let capacity = self.len();
        let range = element_byte_range::<T>(element_offset, data.len(), capacity).ok_or_else(|| {
            VulkanError::capacity(
                "mapped buffer bytes",
                (element_offset + data.len()).saturating_mul(std::mem::size_of::<T>()),
                capacity,
            )
        })?;
        self.bytes_mut()[range].copy_from_slice(bytemuck::cast_slice(data));
        Ok(())
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.buffer.size as usize
    }

    /// Whether the buffer has zero length
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }

    /// Descriptor info covering the whole buffer
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.buffer.descriptor_info()
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.buffer.context.device().unmap_memory(self.buffer.memory);
        }
    }
}

/// Byte range occupied by `count` elements of `T` written at `element_offset`,
/// or `None` if it would not fit in `capacity` bytes
pub fn element_byte_range<T>(element_offset: usize, count: usize, capacity: usize) -> Option<Range<usize>> {
    let stride = std::mem::size_of::<T>();
    let start = element_offset.checked_mul(stride)?;
    let end = start.checked_add(count.checked_mul(stride)?)?;
    (end <= capacity).then_some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_byte_range_in_bounds() {
        assert_eq!(element_byte_range::<u32>(0, 4, 16), Some(0..16));
        assert_eq!(element_byte_range::<u32>(2, 1, 16), Some(8..12));
        assert_eq!(element_byte_range::<[f32; 4]>(1, 0, 16), Some(16..16));
    }

    #[test]
    fn test_element_byte_range_overflow() {
        assert_eq!(element_byte_range::<u32>(3, 2, 16), None);
        assert_eq!(element_byte_range::<u64>(usize::MAX, 1, 16), None);
    }
}
