//! Buffer management for scene arrays, staging and constants
//!
//! Memory is allocated per buffer with an explicit memory-type search. The
//! tracer creates a handful of long-lived buffers, so a sub-allocator would
//! buy nothing.

use std::sync::Arc;

use ash::vk;

use crate::render::backend::{
    BufferDesc, BufferResource, BufferUsage, GpuError, GpuResult, MemoryLocation,
};

use super::context::{VulkanContext, VulkanError, VulkanResult};

/// Usage flags for a buffer role
pub fn usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        BufferUsage::Vertex => {
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Storage => {
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Constant => vk::BufferUsageFlags::UNIFORM_BUFFER,
    }
}

/// Memory properties for a placement
pub fn memory_flags(location: MemoryLocation) -> vk::MemoryPropertyFlags {
    match location {
        MemoryLocation::Upload => {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        }
        MemoryLocation::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
    }
}

/// Buffer wrapper with memory management
pub struct VulkanBuffer {
    context: Arc<VulkanContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    location: MemoryLocation,
    label: String,
}

impl VulkanBuffer {
    /// Create a new buffer with memory allocation
    pub fn new(context: Arc<VulkanContext>, desc: &BufferDesc<'_>) -> VulkanResult<Self> {
        let device = context.raw_device();

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(usage_flags(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = context
            .physical_device
            .find_memory_type(mem_requirements.memory_type_bits, memory_flags(desc.location))
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(mem_requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe {
                    device.allocate_memory(&alloc_info, None).map_err(|e| match e {
                        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                        | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                            VulkanError::OutOfMemory { requested: mem_requirements.size }
                        }
                        other => VulkanError::Api(other),
                    })
                }
            });

        let memory = match memory {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        if let Err(err) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(err));
        }

        Ok(Self {
            context,
            buffer,
            memory,
            size: desc.size,
            location: desc.location,
            label: desc.label.to_string(),
        })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }
}

impl BufferResource for VulkanBuffer {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn write(&self, offset: u64, data: &[u8]) -> GpuResult<()> {
        if self.location != MemoryLocation::Upload {
            return Err(GpuError::invalid(format!("'{}' is not host visible", self.label)));
        }
        let len = data.len() as u64;
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(GpuError::invalid(format!(
                "write of {len} bytes at {offset} overruns '{}' ({} bytes)",
                self.label, self.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        let device = self.context.raw_device();
        let ptr = unsafe {
            device
                .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())
                .map_err(|e| GpuError::MapFailed {
                    label: self.label.clone(),
                    reason: format!("{e:?}"),
                })?
        };

        // HOST_COHERENT memory needs no explicit flush.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.raw_device();
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags() {
        assert!(usage_flags(BufferUsage::Staging).contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert!(usage_flags(BufferUsage::Storage).contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(usage_flags(BufferUsage::Vertex).contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(memory_flags(MemoryLocation::Upload)
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT));
    }
}
