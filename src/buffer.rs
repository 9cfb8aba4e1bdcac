//! Buffers with automatic memory placement.
//!
//! Three allocation strategies cover the runtime's needs:
//!
//! - [`Buffer::new_private`]: device-local memory the CPU never touches.
//!   Used for the GPU heap itself.
//! - [`Buffer::new_host`]: host-visible write-combined memory, persistently
//!   mapped. Used for the upload ring heap.
//! - [`Buffer::new_dynamic`]: host-visible, host-cached memory for fast CPU
//!   reads, persistently mapped. Used for the download ring heap.

use ash::prelude::VkResult;
use ash::vk;
use vk_mem::Alloc;

use crate::alloc::Allocator;

pub struct Buffer {
    allocator: Allocator,
    allocation: vk_mem::Allocation,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    memory_properties: vk::MemoryPropertyFlags,
    mapped_ptr: *mut u8,
}

unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size)
            .field("memory_properties", &self.memory_properties)
            .finish_non_exhaustive()
    }
}

impl Buffer {
    fn from_raw(
        allocator: Allocator,
        buffer: vk::Buffer,
        allocation: vk_mem::Allocation,
        size: vk::DeviceSize,
    ) -> Self {
        let info = allocator.get_allocation_info(&allocation);
        let memory_properties = allocator
            .device()
            .physical_device()
            .memory_types()[info.memory_type as usize]
            .property_flags;
        Self {
            allocator,
            buffer,
            allocation,
            size,
            memory_properties,
            mapped_ptr: info.mapped_data as *mut u8,
        }
    }

    /// A buffer accessible exclusively from the GPU.
    pub fn new_private(
        allocator: Allocator,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<Self> {
        unsafe {
            let (buffer, allocation) = allocator.create_buffer(
                &vk::BufferCreateInfo {
                    size,
                    usage,
                    ..Default::default()
                },
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::AutoPreferDevice,
                    ..Default::default()
                },
            )?;
            Ok(Self::from_raw(allocator, buffer, allocation, size))
        }
    }

    /// A persistently mapped host buffer for sequential CPU writes.
    pub fn new_host(
        allocator: Allocator,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<Self> {
        unsafe {
            let (buffer, allocation) = allocator.create_buffer(
                &vk::BufferCreateInfo {
                    size,
                    usage,
                    ..Default::default()
                },
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::AutoPreferHost,
                    flags: vk_mem::AllocationCreateFlags::MAPPED
                        | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                    ..Default::default()
                },
            )?;
            Ok(Self::from_raw(allocator, buffer, allocation, size))
        }
    }

    /// A persistently mapped host-cached buffer for CPU readback.
    pub fn new_dynamic(
        allocator: Allocator,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<Self> {
        unsafe {
            let (buffer, allocation) = allocator.create_buffer(
                &vk::BufferCreateInfo {
                    size,
                    usage,
                    ..Default::default()
                },
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::AutoPreferHost,
                    flags: vk_mem::AllocationCreateFlags::MAPPED
                        | vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                    ..Default::default()
                },
            )?;
            Ok(Self::from_raw(allocator, buffer, allocation, size))
        }
    }

    pub fn vk_handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// The mapped memory, if this buffer is host-visible.
    pub fn as_slice(&self) -> Option<&[u8]> {
        if self.mapped_ptr.is_null() {
            return None;
        }
        unsafe { Some(std::slice::from_raw_parts(self.mapped_ptr, self.size as usize)) }
    }

    pub fn as_slice_mut(&mut self) -> Option<&mut [u8]> {
        if self.mapped_ptr.is_null() {
            return None;
        }
        unsafe {
            Some(std::slice::from_raw_parts_mut(
                self.mapped_ptr,
                self.size as usize,
            ))
        }
    }

    /// Makes CPU writes in the range visible to the GPU.
    /// No-op for coherent memory.
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<()> {
        if self
            .memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(());
        }
        self.allocator.flush_allocation(&self.allocation, offset, size)
    }

    /// Makes GPU writes in the range visible to the CPU.
    /// No-op for coherent memory.
    pub fn invalidate(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<()> {
        if self
            .memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(());
        }
        self.allocator
            .invalidate_allocation(&self.allocation, offset, size)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.allocator
                .destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}
