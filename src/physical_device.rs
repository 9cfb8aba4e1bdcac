//! Physical device selection and cached properties.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;

use crate::error::{GpuError, GpuResult};
use crate::instance::Instance;

/// A physical device together with its cached properties.
#[derive(Clone)]
pub struct PhysicalDevice(Arc<PhysicalDeviceInner>);

struct PhysicalDeviceInner {
    instance: Instance,
    handle: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_families: Vec<vk::QueueFamilyProperties>,
}

impl PhysicalDevice {
    /// Picks an adapter for the runtime: a discrete GPU when present,
    /// otherwise the first device the loader reports.
    pub fn select(instance: &Instance) -> GpuResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices()? };
        if devices.is_empty() {
            return Err(GpuError::NoAdapter);
        }
        let handle = devices
            .iter()
            .copied()
            .find(|&pd| {
                let props = unsafe { instance.get_physical_device_properties(pd) };
                props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            })
            .unwrap_or(devices[0]);
        Ok(Self::from_raw(instance.clone(), handle))
    }

    pub fn from_raw(instance: Instance, handle: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(handle) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        Self(Arc::new(PhysicalDeviceInner {
            instance,
            handle,
            properties,
            memory_properties,
            queue_families,
        }))
    }

    pub fn instance(&self) -> &Instance {
        &self.0.instance
    }

    pub fn vk_handle(&self) -> vk::PhysicalDevice {
        self.0.handle
    }

    pub fn device_name(&self) -> &CStr {
        self.0
            .properties
            .device_name_as_c_str()
            .unwrap_or(c"unknown adapter")
    }

    /// Queue ticks per second, derived from the timestamp period.
    pub fn timestamp_frequency(&self) -> u64 {
        let period_ns = self.0.properties.limits.timestamp_period as f64;
        if period_ns <= 0.0 {
            return 0;
        }
        (1_000_000_000.0 / period_ns) as u64
    }

    pub fn memory_types(&self) -> &[vk::MemoryType] {
        &self.0.memory_properties.memory_types
            [..self.0.memory_properties.memory_type_count as usize]
    }

    pub fn queue_families(&self) -> &[vk::QueueFamilyProperties] {
        &self.0.queue_families
    }
}
