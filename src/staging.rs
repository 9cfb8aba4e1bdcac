//! Ring staging heaps.
//!
//! Two persistently mapped ring buffers ferry data across the PCIe bus: an
//! upload heap (CPU → GPU, write-combined) and a download heap (GPU → CPU,
//! host-cached). Both use the same allocation protocol:
//!
//! - The head is a monotonically increasing virtual offset; the physical
//!   offset is `head % size`. An allocation that would straddle the end of
//!   the buffer skips ahead to the next ring multiple instead of splitting.
//! - The *safe offset* bounds how far the head may run: it is raised to
//!   `retired_head + size` whenever the submit ring confirms that a
//!   submission recorded at `retired_head` has completed, expressing that a
//!   full ring width past any retired point cannot collide with in-flight
//!   GPU reads or writes.
//!
//! Allocations are rounded up to [`STAGING_ALIGN`] bytes so copy offsets
//! keep the alignment transfer queues want.

use ash::vk;

use crate::alloc::Allocator;
use crate::buffer::Buffer;
use crate::error::GpuResult;

/// Ring allocation granularity in bytes.
pub const STAGING_ALIGN: u64 = 256;

/// A range handed out by [`RingAlloc::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RingRange {
    /// Monotonic virtual begin offset.
    pub begin: u64,
    /// Physical byte offset into the mapped buffer.
    pub mapped_offset: u64,
    /// Rounded allocation size.
    pub size: u64,
}

/// The offset protocol, separated from the backing buffer so the wrap and
/// overflow rules are testable on their own.
#[derive(Debug, Clone)]
pub(crate) struct RingAlloc {
    size: u64,
    head: u64,
    safe_offset: u64,
}

impl RingAlloc {
    pub fn new(size: u64) -> Self {
        debug_assert!(size % STAGING_ALIGN == 0 && size > 0);
        Self {
            size,
            head: 0,
            // One full ring width is safe before anything has retired.
            safe_offset: size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn safe_offset(&self) -> u64 {
        self.safe_offset
    }

    /// Allocates `num_bytes` (rounded up to [`STAGING_ALIGN`]) or returns
    /// `None` when the writer has caught up with unretired GPU work.
    pub fn alloc(&mut self, num_bytes: u64) -> Option<RingRange> {
        if num_bytes == 0 || num_bytes > self.size {
            return None;
        }
        let padded = num_bytes.next_multiple_of(STAGING_ALIGN);
        let mut begin = self.head;
        let mut mapped_offset = begin % self.size;
        if mapped_offset + padded > self.size {
            // Wrap: skip the tail of the ring, keeping the head monotonic.
            begin = begin.next_multiple_of(self.size);
            mapped_offset = 0;
        }
        let end = begin + padded;
        if end > self.safe_offset {
            return None;
        }
        self.head = end;
        Some(RingRange {
            begin,
            mapped_offset,
            size: padded,
        })
    }

    /// Raises the safe offset after the submission stamped at
    /// `retired_head` is known to have completed.
    pub fn retire(&mut self, retired_head: u64) {
        self.safe_offset = self.safe_offset.max(retired_head + self.size);
    }
}

/// Direction of a staging heap, fixing its memory strategy and copy usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StagingDirection {
    Upload,
    Download,
}

/// A mapped ring buffer plus its allocation state.
pub(crate) struct RingStagingHeap {
    buffer: Buffer,
    alloc: RingAlloc,
    direction: StagingDirection,
}

impl RingStagingHeap {
    pub fn new(
        allocator: Allocator,
        direction: StagingDirection,
        size_bytes: u64,
    ) -> GpuResult<Self> {
        let size = size_bytes.max(STAGING_ALIGN).next_multiple_of(STAGING_ALIGN);
        let buffer = match direction {
            StagingDirection::Upload => {
                Buffer::new_host(allocator, size, vk::BufferUsageFlags::TRANSFER_SRC)?
            }
            StagingDirection::Download => {
                Buffer::new_dynamic(allocator, size, vk::BufferUsageFlags::TRANSFER_DST)?
            }
        };
        tracing::info!(?direction, size, "allocated staging ring heap");
        Ok(Self {
            buffer,
            alloc: RingAlloc::new(size),
            direction,
        })
    }

    pub fn size(&self) -> u64 {
        self.alloc.size()
    }

    pub fn head(&self) -> u64 {
        self.alloc.head()
    }

    pub fn vk_handle(&self) -> vk::Buffer {
        self.buffer.vk_handle()
    }

    pub fn retire(&mut self, retired_head: u64) {
        self.alloc.retire(retired_head);
    }

    /// Allocates a range and copies `src` into it. Upload direction only.
    pub fn write(&mut self, src: &[u8]) -> Option<RingRange> {
        debug_assert_eq!(self.direction, StagingDirection::Upload);
        let range = self.alloc.alloc(src.len() as u64)?;
        let mapped = self
            .buffer
            .as_slice_mut()
            .expect("staging heaps are always mapped");
        let begin = range.mapped_offset as usize;
        mapped[begin..begin + src.len()].copy_from_slice(src);
        if let Err(err) = self.buffer.flush(range.mapped_offset, range.size) {
            tracing::error!(?err, "failed to flush upload heap range");
        }
        Some(range)
    }

    /// Allocates a range for the GPU to copy into. Download direction only.
    pub fn reserve(&mut self, num_bytes: u64) -> Option<RingRange> {
        debug_assert_eq!(self.direction, StagingDirection::Download);
        self.alloc.alloc(num_bytes)
    }

    /// Reads `dst.len()` bytes back from a previously reserved range.
    /// The caller must have confirmed the producing submission completed.
    pub fn read(&self, mapped_offset: u64, dst: &mut [u8]) {
        debug_assert_eq!(self.direction, StagingDirection::Download);
        if let Err(err) = self.buffer.invalidate(mapped_offset, dst.len() as u64) {
            tracing::error!(?err, "failed to invalidate download heap range");
        }
        let mapped = self
            .buffer
            .as_slice()
            .expect("staging heaps are always mapped");
        let begin = mapped_offset as usize;
        dst.copy_from_slice(&mapped[begin..begin + dst.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_allocations_advance_by_rounded_size() {
        let mut ring = RingAlloc::new(1024);
        let a = ring.alloc(200).unwrap();
        let b = ring.alloc(200).unwrap();
        assert_eq!(a.begin, 0);
        assert_eq!(a.size, 256);
        assert_eq!(b.begin, 256);
        assert_eq!(ring.head(), 512);
    }

    #[test]
    fn exactly_filling_the_ring_succeeds_and_the_next_byte_fails() {
        let mut ring = RingAlloc::new(1024);
        for _ in 0..4 {
            assert!(ring.alloc(256).is_some());
        }
        assert_eq!(ring.head(), 1024);
        // The writer has caught up with unretired GPU work.
        assert!(ring.alloc(1).is_none());
    }

    #[test]
    fn retiring_reopens_the_ring() {
        let mut ring = RingAlloc::new(1024);
        for _ in 0..4 {
            assert!(ring.alloc(256).is_some());
        }
        assert!(ring.alloc(256).is_none());
        // A submission stamped at head=512 completed.
        ring.retire(512);
        assert_eq!(ring.safe_offset(), 512 + 1024);
        assert!(ring.alloc(256).is_some());
        assert!(ring.alloc(256).is_some());
        assert!(ring.alloc(256).is_none());
    }

    #[test]
    fn straddling_allocations_wrap_to_the_next_ring_multiple() {
        let mut ring = RingAlloc::new(1024);
        ring.retire(4096); // plenty of retired room
        assert!(ring.alloc(768).is_some());
        // 512 bytes would straddle offset 1024; the head skips ahead.
        let wrapped = ring.alloc(512).unwrap();
        assert_eq!(wrapped.begin, 1024);
        assert_eq!(wrapped.mapped_offset, 0);
        assert_eq!(ring.head(), 1536);
    }

    #[test]
    fn head_stays_monotonic_across_many_wraps() {
        // 16 uploads of 200 bytes with retirement every 4: the head keeps
        // climbing by 256 each time and never reuses a virtual offset.
        let mut ring = RingAlloc::new(1024);
        let mut last_begin = None;
        for i in 0..16u64 {
            let range = ring.alloc(200).expect("ring should never overflow here");
            if let Some(prev) = last_begin {
                assert!(range.begin > prev);
            }
            last_begin = Some(range.begin);
            if i % 4 == 3 {
                ring.retire(ring.head());
            }
        }
        assert_eq!(ring.head(), 16 * 256);
        assert!(ring.head() >= 4 * ring.size());
    }

    #[test]
    fn zero_and_oversized_requests_are_rejected() {
        let mut ring = RingAlloc::new(1024);
        assert!(ring.alloc(0).is_none());
        assert!(ring.alloc(1025).is_none());
        assert_eq!(ring.head(), 0);
    }
}
