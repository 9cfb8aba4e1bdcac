//! Logical device creation.
//!
//! The runtime has a fixed feature footprint, so device creation is a
//! single function rather than a general builder: one compute queue,
//! timeline semaphores, synchronization2, the descriptor-indexing flags the
//! bindless table relies on, and format-agnostic storage image access for
//! the kernel-side texture array.

use std::ffi::CStr;
use std::sync::Arc;

use ash::{ext, khr, vk};

use crate::error::{GpuError, GpuResult};
use crate::instance::Instance;
use crate::physical_device::PhysicalDevice;

/// A reference-counted logical device.
///
/// Dereferences to [`ash::Device`]. Every GPU resource in the runtime holds
/// a clone, so the device outlives all of them and teardown order is
/// structural.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

struct DeviceInner {
    physical_device: PhysicalDevice,
    device: ash::Device,
    swapchain_loader: Option<khr::swapchain::Device>,
    debug_utils: Option<ext::debug_utils::Device>,
    queue_family_index: u32,
}

impl Device {
    /// Creates the logical device with the runtime's fixed feature chain.
    ///
    /// `needs_swapchain` additionally enables `VK_KHR_swapchain`, and
    /// `queue_family_filter` lets the caller reject queue families that
    /// cannot present to its surface.
    pub fn create(
        physical_device: PhysicalDevice,
        needs_swapchain: bool,
        debug_mode: bool,
        queue_family_filter: impl Fn(u32) -> bool,
    ) -> GpuResult<Self> {
        let queue_family_index = physical_device
            .queue_families()
            .iter()
            .enumerate()
            .filter(|(index, family)| {
                family.queue_flags.contains(vk::QueueFlags::COMPUTE)
                    && queue_family_filter(*index as u32)
            })
            .min_by_key(|(_, family)| family.queue_flags.as_raw().count_ones())
            .map(|(index, _)| index as u32)
            .ok_or(GpuError::NoAdapter)?;

        check_features(&physical_device)?;

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .shader_storage_image_array_non_uniform_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_update_unused_while_pending(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
        let features = vk::PhysicalDeviceFeatures::default()
            .shader_storage_image_read_without_format(true)
            .shader_storage_image_write_without_format(true);

        let mut extensions: Vec<*const std::ffi::c_char> = Vec::new();
        if needs_swapchain {
            extensions.push(khr::swapchain::NAME.as_ptr());
        }

        let queue_priorities = [1.0f32];
        let queue_create_info = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_info)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device = unsafe {
            physical_device.instance().create_device(
                physical_device.vk_handle(),
                &create_info,
                None,
            )?
        };
        tracing::info!(
            adapter = %physical_device.device_name().to_string_lossy(),
            queue_family_index,
            "created logical device"
        );

        let swapchain_loader = needs_swapchain
            .then(|| khr::swapchain::Device::new(physical_device.instance(), &device));
        let debug_utils = debug_mode
            .then(|| ext::debug_utils::Device::new(physical_device.instance(), &device));

        Ok(Self(Arc::new(DeviceInner {
            physical_device,
            device,
            swapchain_loader,
            debug_utils,
            queue_family_index,
        })))
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.0.physical_device
    }

    pub fn instance(&self) -> &Instance {
        self.0.physical_device.instance()
    }

    pub fn queue_family_index(&self) -> u32 {
        self.0.queue_family_index
    }

    /// The swapchain function loader. Present only when the device was
    /// created for a windowed runtime.
    pub fn swapchain_loader(&self) -> &khr::swapchain::Device {
        self.0
            .swapchain_loader
            .as_ref()
            .expect("device was created without swapchain support")
    }

    /// Attaches a debug name to an API object. No-op outside debug mode.
    pub fn set_debug_name<T: vk::Handle>(&self, object: T, name: &CStr) {
        if let Some(debug_utils) = &self.0.debug_utils {
            let info = vk::DebugUtilsObjectNameInfoEXT::default()
                .object_handle(object)
                .object_name(name);
            unsafe {
                let _ = debug_utils.set_debug_utils_object_name(&info);
            }
        }
    }
}

impl std::ops::Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.0.device
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        tracing::info!(device = ?self.device.handle(), "drop device");
        // Every queue and resource retains an Arc to this device, so by the
        // time we get here nothing created from it is still alive.
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

fn check_features(physical_device: &PhysicalDevice) -> GpuResult<()> {
    let instance = physical_device.instance();
    let mut available12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut available13 = vk::PhysicalDeviceVulkan13Features::default();
    let base = {
        let mut available = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut available12)
            .push_next(&mut available13);
        unsafe {
            instance.get_physical_device_features2(physical_device.vk_handle(), &mut available);
        }
        available.features
    };
    let checks: [(&'static str, bool); 8] = [
        (
            "shaderStorageImageReadWithoutFormat",
            base.shader_storage_image_read_without_format == vk::TRUE,
        ),
        (
            "shaderStorageImageWriteWithoutFormat",
            base.shader_storage_image_write_without_format == vk::TRUE,
        ),
        ("timelineSemaphore", available12.timeline_semaphore == vk::TRUE),
        (
            "shaderStorageImageArrayNonUniformIndexing",
            available12.shader_storage_image_array_non_uniform_indexing == vk::TRUE,
        ),
        (
            "runtimeDescriptorArray",
            available12.runtime_descriptor_array == vk::TRUE,
        ),
        (
            "descriptorBindingPartiallyBound",
            available12.descriptor_binding_partially_bound == vk::TRUE,
        ),
        (
            "descriptorBindingStorageImageUpdateAfterBind",
            available12.descriptor_binding_storage_image_update_after_bind == vk::TRUE,
        ),
        ("synchronization2", available13.synchronization2 == vk::TRUE),
    ];
    for (name, supported) in checks {
        if !supported {
            return Err(GpuError::MissingFeature(name));
        }
    }
    Ok(())
}
