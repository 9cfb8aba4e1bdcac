//! The bindless RW-texture table.
//!
//! One shader-visible descriptor set carries the whole kernel ABI: the GPU
//! heap buffer at binding 0 and a runtime array of storage images at
//! binding 1, indexed from kernels by [`GpuRWTex`](crate::GpuRWTex) values.
//!
//! The image binding is declared `PARTIALLY_BOUND | UPDATE_AFTER_BIND |
//! UPDATE_UNUSED_WHILE_PENDING`, so slots may be rewritten while previously
//! recorded command lists are still in flight; the next list that binds the
//! set sees the new contents. Slot 0 is permanently the null texture, and
//! every vacant slot is pointed at the same 1×1 null image so out-of-bounds
//! indices read defined data.

use ash::vk;
use glam::UVec2;

use crate::alloc::Allocator;
use crate::device::Device;
use crate::error::GpuResult;
use crate::image::{Image, ImageView};

/// Binding index of the GPU heap buffer inside the set.
pub(crate) const BINDING_GLOBAL_HEAP: u32 = 0;
/// Binding index of the storage image array inside the set.
pub(crate) const BINDING_RWTEX_ARRAY: u32 = 1;

pub(crate) struct BindlessTable {
    device: Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    capacity: u32,
    null_view: ImageView,
    null_image: Image,
}

impl BindlessTable {
    pub fn new(device: Device, allocator: Allocator, capacity: u32) -> GpuResult<Self> {
        let null_image = Image::new_private(
            allocator,
            UVec2::ONE,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::STORAGE,
        )?;
        let null_view = null_image.create_view(&device)?;

        let bindings = [
            vk::DescriptorSetLayoutBinding {
                binding: BINDING_GLOBAL_HEAP,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: BINDING_RWTEX_ARRAY,
                descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: capacity,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                ..Default::default()
            },
        ];
        let binding_flags = [
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING,
        ];
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&binding_flags);
        let layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default()
                    .bindings(&bindings)
                    .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                    .push_next(&mut flags_info),
                None,
            )?
        };

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: capacity,
            },
        ];
        let pool = unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .pool_sizes(&pool_sizes)
                    .max_sets(1)
                    .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND),
                None,
            )?
        };

        let set = unsafe {
            let layouts = [layout];
            device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts),
            )?[0]
        };
        device.set_debug_name(set, c"scoria rwtex table");

        let table = Self {
            device,
            layout,
            pool,
            set,
            capacity,
            null_view,
            null_image,
        };
        table.write_null_range(0, capacity);
        Ok(table)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// The 1×1 image behind null slots; it needs a one-time layout
    /// transition to `GENERAL` on the first command list.
    pub fn null_image_handle(&self) -> vk::Image {
        self.null_image.vk_handle()
    }

    /// Points binding 0 at the GPU heap buffer. Called once at init.
    pub fn write_heap_buffer(&self, buffer: vk::Buffer, size: vk::DeviceSize) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: size,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(BINDING_GLOBAL_HEAP)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info);
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
    }

    /// Writes an image view into a texture slot.
    pub fn write_slot(&self, slot: u16, view: &ImageView) {
        self.write_view(slot, view.vk_handle());
    }

    /// Resets a texture slot to the null image.
    pub fn write_null(&self, slot: u16) {
        self.write_view(slot, self.null_view.vk_handle());
    }

    fn write_view(&self, slot: u16, view: vk::ImageView) {
        debug_assert!((slot as u32) < self.capacity);
        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(BINDING_RWTEX_ARRAY)
            .dst_array_element(slot as u32)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(&image_info);
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
    }

    fn write_null_range(&self, first: u32, count: u32) {
        let image_infos = vec![
            vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: self.null_view.vk_handle(),
                image_layout: vk::ImageLayout::GENERAL,
            };
            count as usize
        ];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(BINDING_RWTEX_ARRAY)
            .dst_array_element(first)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(&image_infos);
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
    }
}

impl Drop for BindlessTable {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
