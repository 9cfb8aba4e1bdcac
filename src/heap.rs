//! The GPU heap.
//!
//! One large device-local buffer holds all user data. User code addresses
//! it with [`GpuPtr`], a flat 32-bit byte offset. The first
//! [`GPU_HEAP_SYSTEM_RESERVED`] bytes belong to the runtime; user
//! allocations start above them, aligned to [`GPU_MALLOC_ALIGN`].
//!
//! Allocation is a bump pointer behind a stable contract: any future
//! allocator must preserve the reserved prefix, the alignment, and the null
//! pointer convention. `free` is a no-op today.

use ash::vk;

use crate::alloc::Allocator;
use crate::buffer::Buffer;
use crate::error::GpuResult;

/// Byte offsets below this value are reserved for runtime internals.
pub const GPU_HEAP_SYSTEM_RESERVED: u32 = 8 * 1024 * 1024;
/// Minimum heap size: nothing smaller than the reserved prefix is useful.
pub const GPU_HEAP_MIN_SIZE: u32 = GPU_HEAP_SYSTEM_RESERVED;
/// Every allocation is aligned to this many bytes.
pub const GPU_MALLOC_ALIGN: u32 = 64;

/// An opaque 32-bit offset into the GPU heap. `NULL` (0) is never a valid
/// allocation: user pointers always sit at or above the reserved prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuPtr(pub u32);

impl GpuPtr {
    pub const NULL: GpuPtr = GpuPtr(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn offset(&self) -> u32 {
        self.0
    }
}

impl Default for GpuPtr {
    fn default() -> Self {
        GpuPtr::NULL
    }
}

impl std::ops::Add<u32> for GpuPtr {
    type Output = GpuPtr;

    fn add(self, rhs: u32) -> GpuPtr {
        GpuPtr(self.0 + rhs)
    }
}

/// The bump-pointer state, separated from the backing buffer so the
/// allocation rules are testable on their own.
#[derive(Debug, Clone)]
pub(crate) struct BumpAllocator {
    size: u32,
    next_free: u32,
}

impl BumpAllocator {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            next_free: GPU_HEAP_SYSTEM_RESERVED,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns an aligned pointer to `num_bytes` fresh bytes, or `NULL` when
    /// the request is empty or the heap would overflow.
    pub fn alloc(&mut self, num_bytes: u32) -> GpuPtr {
        if num_bytes == 0 {
            return GpuPtr::NULL;
        }
        let Some(padded) = num_bytes.checked_next_multiple_of(GPU_MALLOC_ALIGN) else {
            return GpuPtr::NULL;
        };
        let begin = self.next_free;
        let Some(end) = begin.checked_add(padded) else {
            return GpuPtr::NULL;
        };
        if end > self.size {
            return GpuPtr::NULL;
        }
        self.next_free = end;
        GpuPtr(begin)
    }
}

/// The GPU heap: the backing buffer plus the bump allocator.
pub(crate) struct GpuHeap {
    buffer: Buffer,
    alloc: BumpAllocator,
}

impl GpuHeap {
    pub fn new(allocator: Allocator, size_bytes: u32) -> GpuResult<Self> {
        let size_bytes = size_bytes.max(GPU_HEAP_MIN_SIZE);
        let buffer = Buffer::new_private(
            allocator,
            size_bytes as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        tracing::info!(
            size_mib = size_bytes as f64 / (1024.0 * 1024.0),
            "allocated GPU heap"
        );
        Ok(Self {
            buffer,
            alloc: BumpAllocator::new(size_bytes),
        })
    }

    pub fn size(&self) -> u32 {
        self.alloc.size()
    }

    pub fn vk_handle(&self) -> vk::Buffer {
        self.buffer.vk_handle()
    }

    pub fn malloc(&mut self, num_bytes: u32) -> GpuPtr {
        let ptr = self.alloc.alloc(num_bytes);
        if ptr.is_null() && num_bytes != 0 {
            tracing::warn!(
                num_bytes,
                heap_size = self.alloc.size(),
                "GPU heap exhausted, returning null pointer"
            );
        }
        ptr
    }

    /// No-op. The bump allocator never reclaims; the contract keeps the
    /// call so a real allocator can slot in behind it.
    pub fn free(&mut self, _ptr: GpuPtr) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_above_the_reserved_prefix() {
        let mut heap = BumpAllocator::new(GPU_HEAP_SYSTEM_RESERVED + 1024);
        let a = heap.alloc(1);
        let b = heap.alloc(65);
        assert!(!a.is_null());
        assert!(!b.is_null());
        for p in [a, b] {
            assert!(p.offset() >= GPU_HEAP_SYSTEM_RESERVED);
            assert_eq!(p.offset() % GPU_MALLOC_ALIGN, 0);
        }
        // 1 byte rounds to 64, 65 bytes to 128.
        assert_eq!(b.offset() - a.offset(), 64);
    }

    #[test]
    fn exact_fill_succeeds_and_one_more_byte_fails() {
        let mut heap = BumpAllocator::new(GPU_HEAP_SYSTEM_RESERVED + 256);
        let a = heap.alloc(256);
        assert!(!a.is_null());
        assert!(heap.alloc(1).is_null());
    }

    #[test]
    fn zero_byte_request_is_null() {
        let mut heap = BumpAllocator::new(GPU_HEAP_SYSTEM_RESERVED + 256);
        assert!(heap.alloc(0).is_null());
        // The head did not move.
        assert_eq!(heap.alloc(256).offset(), GPU_HEAP_SYSTEM_RESERVED);
    }

    #[test]
    fn oversized_request_does_not_wrap() {
        let mut heap = BumpAllocator::new(u32::MAX);
        assert!(heap.alloc(u32::MAX).is_null());
        // Near-limit request that would overflow the padded end.
        assert!(heap.alloc(u32::MAX - GPU_MALLOC_ALIGN + 1).is_null());
    }
}
