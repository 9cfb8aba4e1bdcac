//! Synchronization primitives.
//!
//! Two semaphore flavors back the runtime:
//!
//! - A timeline semaphore is the command-queue fence. Every submit signals
//!   it to the next fence value; ring-slot reuse and [`flush`] wait on it.
//! - Binary semaphores pair with the swapchain's acquire/present protocol,
//!   which cannot use timeline semaphores.
//!
//! The timeline counter is cached in an [`AtomicU64`] so polling a value
//! that is already known to have been reached skips the API call.
//!
//! [`flush`]: crate::Gpu::flush

use std::sync::atomic::{AtomicU64, Ordering};

use ash::prelude::VkResult;
use ash::vk;

use crate::device::Device;

pub struct Semaphore {
    device: Device,
    handle: vk::Semaphore,
    /// Highest counter value observed; only meaningful for timelines.
    value: AtomicU64,
    is_timeline: bool,
}

impl Semaphore {
    /// Creates a timeline semaphore with the given initial value.
    pub fn new_timeline(device: Device, initial_value: u64) -> VkResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let handle = unsafe { device.create_semaphore(&info, None)? };
        Ok(Self {
            device,
            handle,
            value: AtomicU64::new(initial_value),
            is_timeline: true,
        })
    }

    /// Creates a binary semaphore for swapchain handover.
    pub fn new_binary(device: Device) -> VkResult<Self> {
        let info = vk::SemaphoreCreateInfo::default();
        let handle = unsafe { device.create_semaphore(&info, None)? };
        Ok(Self {
            device,
            handle,
            value: AtomicU64::new(0),
            is_timeline: false,
        })
    }

    pub fn vk_handle(&self) -> vk::Semaphore {
        self.handle
    }

    /// Queries the current timeline counter and refreshes the cache.
    pub fn value(&self) -> VkResult<u64> {
        assert!(self.is_timeline);
        let fresh = unsafe { self.device.get_semaphore_counter_value(self.handle)? };
        self.value.fetch_max(fresh, Ordering::Relaxed);
        Ok(fresh)
    }

    /// Whether the timeline has reached `value`.
    pub fn is_signaled(&self, value: u64) -> VkResult<bool> {
        assert!(self.is_timeline);
        if self.value.load(Ordering::Relaxed) >= value {
            return Ok(true);
        }
        Ok(self.value()? >= value)
    }

    /// Blocks until the timeline reaches `value`.
    pub fn wait(&self, value: u64, timeout: u64) -> VkResult<()> {
        assert!(self.is_timeline);
        if self.value.load(Ordering::Relaxed) >= value {
            return Ok(());
        }
        let semaphores = [self.handle];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe {
            self.device.wait_semaphores(&info, timeout)?;
        }
        self.value.fetch_max(value, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.handle, None);
        }
    }
}
