//! GPU memory allocation.
//!
//! A thin reference-counted wrapper around the Vulkan Memory Allocator.
//! Buffers and images hold clones, so the allocator (and through it the
//! device) outlives every allocation.

use std::ops::Deref;
use std::sync::Arc;

use ash::prelude::VkResult;

use crate::device::Device;

#[derive(Clone)]
pub struct Allocator(Arc<AllocatorInner>);

struct AllocatorInner {
    device: Device,
    inner: vk_mem::Allocator,
}

impl Allocator {
    pub fn new(device: Device) -> VkResult<Self> {
        let info = vk_mem::AllocatorCreateInfo::new(
            device.instance(),
            &device,
            device.physical_device().vk_handle(),
        );
        let inner = unsafe { vk_mem::Allocator::new(info)? };
        Ok(Self(Arc::new(AllocatorInner { device, inner })))
    }

    pub fn device(&self) -> &Device {
        &self.0.device
    }
}

impl Deref for Allocator {
    type Target = vk_mem::Allocator;

    fn deref(&self) -> &Self::Target {
        &self.0.inner
    }
}
