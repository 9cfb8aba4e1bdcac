//! The command queue.
//!
//! Submissions on the single runtime queue start in order; completion is
//! tracked through the timeline semaphore owned by the submit ring.

use ash::prelude::VkResult;
use ash::vk;

use crate::device::Device;

pub struct Queue {
    device: Device,
    handle: vk::Queue,
    family_index: u32,
}

impl Queue {
    pub fn new(device: Device) -> Self {
        let family_index = device.queue_family_index();
        let handle = unsafe { device.get_device_queue(family_index, 0) };
        Self {
            device,
            handle,
            family_index,
        }
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn vk_handle(&self) -> vk::Queue {
        self.handle
    }

    /// Submits a batch of recorded command buffers.
    pub fn submit(&self, submits: &[vk::SubmitInfo2<'_>]) -> VkResult<()> {
        unsafe {
            self.device
                .queue_submit2(self.handle, submits, vk::Fence::null())
        }
    }
}
