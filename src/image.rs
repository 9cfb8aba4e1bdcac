//! 2-D images and views.
//!
//! Every texture the runtime creates is a committed 2-D single-mip image in
//! device-local memory, accessed by kernels through the bindless table in
//! `GENERAL` layout.

use ash::prelude::VkResult;
use ash::vk;
use glam::UVec2;
use vk_mem::Alloc;

use crate::alloc::Allocator;
use crate::device::Device;

pub struct Image {
    allocator: Allocator,
    handle: vk::Image,
    allocation: vk_mem::Allocation,
    format: vk::Format,
}

unsafe impl Send for Image {}
unsafe impl Sync for Image {}

impl Image {
    /// Creates a GPU-only 2-D image with one mip level and one array layer.
    pub fn new_private(
        allocator: Allocator,
        extent: UVec2,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> VkResult<Self> {
        let info = vk::ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.x,
                height: extent.y,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        unsafe {
            let (handle, allocation) = allocator.create_image(
                &info,
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::AutoPreferDevice,
                    ..Default::default()
                },
            )?;
            Ok(Self {
                allocator,
                handle,
                allocation,
                format,
            })
        }
    }

    pub fn vk_handle(&self) -> vk::Image {
        self.handle
    }

    /// Creates a full 2-D view of this image.
    pub fn create_view(&self, device: &Device) -> VkResult<ImageView> {
        let view = unsafe {
            device.create_image_view(
                &vk::ImageViewCreateInfo {
                    image: self.handle,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: self.format,
                    components: vk::ComponentMapping::default(),
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                },
                None,
            )?
        };
        Ok(ImageView {
            device: device.clone(),
            handle: view,
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.allocator
                .destroy_image(self.handle, &mut self.allocation);
        }
    }
}

/// An image view that destroys itself on drop.
pub struct ImageView {
    device: Device,
    handle: vk::ImageView,
}

impl ImageView {
    pub fn vk_handle(&self) -> vk::ImageView {
        self.handle
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.handle, None);
        }
    }
}
