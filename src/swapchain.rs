//! Swapchain, surface and the virtual swapchain RT.
//!
//! Kernels never touch real backbuffers. They write to the *virtual
//! swapchain RT*, a storage image published at the reserved bindless slot
//! [`GpuRWTex::SWAPCHAIN`](crate::GpuRWTex::SWAPCHAIN). At submit time the
//! runtime acquires a backbuffer, blits the virtual RT into it (converting
//! formats along the way) and hands it to `present`. The indirection gives
//! kernels a stable storage-writable target no matter what format and
//! usage the presentation engine demands.
//!
//! `present` also polls the surface resolution; a size change (or a vsync
//! flip, which in Vulkan is a swapchain property) makes the façade flush,
//! recreate the swapchain and virtual RT in place, and rebuild every
//! swapchain-relative texture.

use ash::{khr, vk};
use glam::UVec2;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::alloc::Allocator;
use crate::descriptor::BindlessTable;
use crate::device::Device;
use crate::error::{GpuError, GpuResult};
use crate::image::{Image, ImageView};
use crate::instance::Instance;
use crate::queue::Queue;
use crate::submit::GPU_NUM_CONCURRENT_SUBMITS;
use crate::sync::Semaphore;
use crate::texture::GpuRWTex;

/// Format of the virtual swapchain RT. Kernels see it through the
/// format-agnostic texture array; the blit converts to whatever the
/// surface wants.
const VIRTUAL_RT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub(crate) struct Surface {
    /// Keeps the instance alive for the loader and handle.
    _instance: Instance,
    loader: khr::surface::Instance,
    handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn create(
        instance: Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> GpuResult<Self> {
        let handle = create_platform_surface(&instance, display, window)?;
        let loader = khr::surface::Instance::new(instance.entry(), &instance);
        Ok(Self {
            _instance: instance,
            loader,
            handle,
        })
    }

    pub fn supports_queue_family(&self, pdevice: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(pdevice, family, self.handle)
                .unwrap_or(false)
        }
    }

    fn capabilities(&self, pdevice: vk::PhysicalDevice) -> GpuResult<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_capabilities(pdevice, self.handle)?
        })
    }

    fn formats(&self, pdevice: vk::PhysicalDevice) -> GpuResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_formats(pdevice, self.handle)?
        })
    }

    fn present_modes(&self, pdevice: vk::PhysicalDevice) -> GpuResult<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_present_modes(pdevice, self.handle)?
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

struct VirtualRt {
    image: Image,
    view: ImageView,
    res: UVec2,
}

pub(crate) struct SwapchainCtx {
    device: Device,
    allocator: Allocator,
    surface: Surface,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    res: UVec2,
    surface_format: vk::SurfaceFormatKHR,
    vsync: bool,
    allow_tearing: bool,
    tearing_supported: bool,
    /// One acquire semaphore per ring slot, rotated each acquire; the ring
    /// guarantees the previous wait on it completed before reuse.
    acquire_semaphores: Vec<Semaphore>,
    acquire_cursor: usize,
    /// One present semaphore per backbuffer.
    present_semaphores: Vec<Semaphore>,
    pending_present: Option<u32>,
    needs_recreate: bool,
    virtual_rt: Option<VirtualRt>,
}

impl SwapchainCtx {
    /// Creates the swapchain and virtual RT, publishing the RT at the
    /// reserved descriptor slot. Returns the context plus the RT image
    /// still needing its initial layout transition.
    pub fn new(
        device: Device,
        allocator: Allocator,
        surface: Surface,
        allow_tearing: bool,
        table: &BindlessTable,
    ) -> GpuResult<(Self, vk::Image)> {
        let pdevice = device.physical_device().vk_handle();
        let tearing_supported = surface
            .present_modes(pdevice)?
            .contains(&vk::PresentModeKHR::IMMEDIATE);
        let surface_format = pick_surface_format(&surface.formats(pdevice)?);

        let mut ctx = Self {
            device,
            allocator,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            res: UVec2::ZERO,
            surface_format,
            // Init presents once with vsync off; start there so the first
            // present does not force a recreate.
            vsync: false,
            allow_tearing,
            tearing_supported,
            acquire_semaphores: Vec::new(),
            acquire_cursor: 0,
            present_semaphores: Vec::new(),
            pending_present: None,
            needs_recreate: false,
            virtual_rt: None,
        };
        let res = ctx.surface_res()?;
        if res.x == 0 || res.y == 0 {
            return Err(GpuError::Config(
                "window has a zero-sized client area".into(),
            ));
        }
        ctx.build_swapchain(res, false)?;
        let rt_image = ctx.build_virtual_rt(res, table)?;
        Ok((ctx, rt_image))
    }

    pub fn res(&self) -> UVec2 {
        self.res
    }

    pub fn rt_res(&self) -> Option<UVec2> {
        self.virtual_rt.as_ref().map(|rt| rt.res)
    }

    pub fn rt_image(&self) -> Option<vk::Image> {
        self.virtual_rt.as_ref().map(|rt| rt.image.vk_handle())
    }

    /// The current window client resolution as the surface reports it.
    pub fn surface_res(&self) -> GpuResult<UVec2> {
        let caps = self
            .surface
            .capabilities(self.device.physical_device().vk_handle())?;
        let extent = caps.current_extent;
        if extent.width == u32::MAX && extent.height == u32::MAX {
            // The surface leaves the size up to the swapchain.
            return Ok(self.res.max(UVec2::ONE));
        }
        Ok(UVec2::new(extent.width, extent.height))
    }

    /// Acquires the next backbuffer and records the virtual RT blit into
    /// `cmd`. Returns the semaphores to wire into the submission, or
    /// `None` when the swapchain is out of date or has no virtual RT.
    pub fn record_backbuffer_blit(
        &mut self,
        cmd: vk::CommandBuffer,
    ) -> Option<(vk::Semaphore, vk::Semaphore)> {
        if self.needs_recreate || self.pending_present.is_some() {
            return None;
        }
        let (rt_image, rt_res) = {
            let rt = self.virtual_rt.as_ref()?;
            (rt.image.vk_handle(), rt.res)
        };

        let acquire_handle = self.acquire_semaphores[self.acquire_cursor].vk_handle();
        let acquired = unsafe {
            self.device.swapchain_loader().acquire_next_image(
                self.swapchain,
                u64::MAX,
                acquire_handle,
                vk::Fence::null(),
            )
        };
        let image_index = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_recreate = true;
                return None;
            }
            Err(err) => {
                tracing::error!(?err, "failed to acquire a backbuffer");
                return None;
            }
        };
        self.acquire_cursor = (self.acquire_cursor + 1) % self.acquire_semaphores.len();

        let backbuffer = self.images[image_index as usize];
        unsafe {
            // Virtual RT to copy-source, backbuffer to copy-dest. The
            // backbuffer's previous contents are replaced whole, so its old
            // layout can be discarded.
            let to_transfer = [
                vk::ImageMemoryBarrier2 {
                    src_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
                    src_access_mask: vk::AccessFlags2::SHADER_STORAGE_WRITE,
                    dst_stage_mask: vk::PipelineStageFlags2::BLIT,
                    dst_access_mask: vk::AccessFlags2::TRANSFER_READ,
                    old_layout: vk::ImageLayout::GENERAL,
                    new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image: rt_image,
                    subresource_range: color_range(),
                    ..Default::default()
                },
                vk::ImageMemoryBarrier2 {
                    src_stage_mask: vk::PipelineStageFlags2::NONE,
                    src_access_mask: vk::AccessFlags2::NONE,
                    dst_stage_mask: vk::PipelineStageFlags2::BLIT,
                    dst_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    image: backbuffer,
                    subresource_range: color_range(),
                    ..Default::default()
                },
            ];
            self.device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(&to_transfer),
            );

            let blit = vk::ImageBlit {
                src_subresource: color_layers(),
                src_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: rt_res.x as i32,
                        y: rt_res.y as i32,
                        z: 1,
                    },
                ],
                dst_subresource: color_layers(),
                dst_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: self.res.x as i32,
                        y: self.res.y as i32,
                        z: 1,
                    },
                ],
            };
            self.device.cmd_blit_image(
                cmd,
                rt_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                backbuffer,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::NEAREST,
            );

            let to_present = [
                vk::ImageMemoryBarrier2 {
                    src_stage_mask: vk::PipelineStageFlags2::BLIT,
                    src_access_mask: vk::AccessFlags2::TRANSFER_READ,
                    dst_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
                    dst_access_mask: vk::AccessFlags2::SHADER_STORAGE_READ
                        | vk::AccessFlags2::SHADER_STORAGE_WRITE,
                    old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    new_layout: vk::ImageLayout::GENERAL,
                    image: rt_image,
                    subresource_range: color_range(),
                    ..Default::default()
                },
                vk::ImageMemoryBarrier2 {
                    src_stage_mask: vk::PipelineStageFlags2::BLIT,
                    src_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
                    dst_stage_mask: vk::PipelineStageFlags2::NONE,
                    dst_access_mask: vk::AccessFlags2::NONE,
                    old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                    image: backbuffer,
                    subresource_range: color_range(),
                    ..Default::default()
                },
            ];
            self.device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(&to_present),
            );
        }

        self.pending_present = Some(image_index);
        let present_handle = self.present_semaphores[image_index as usize].vk_handle();
        Some((acquire_handle, present_handle))
    }

    /// Presents the backbuffer blitted at the last submit, if any.
    pub fn present(&mut self, queue: &Queue) {
        let Some(image_index) = self.pending_present.take() else {
            return;
        };
        let wait = [self.present_semaphores[image_index as usize].vk_handle()];
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let result = unsafe {
            self.device
                .swapchain_loader()
                .queue_present(queue.vk_handle(), &info)
        };
        match result {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_recreate = true;
            }
            Err(err) => {
                tracing::error!(?err, "present failed");
            }
        }
    }

    /// Whether the next frame needs the flush-and-recreate path: the
    /// window resized, presentation went stale, or the vsync setting
    /// changed (present mode is a swapchain property).
    pub fn wants_recreate(&self, vsync: bool) -> bool {
        if self.needs_recreate || vsync != self.vsync {
            return true;
        }
        match self.surface_res() {
            Ok(res) => res != self.res && res.x != 0 && res.y != 0,
            Err(_) => false,
        }
    }

    /// Rebuilds the swapchain and virtual RT for the current window size.
    /// The caller must have flushed the GPU. Returns the new resolution
    /// plus the fresh RT image needing its initial layout transition; or
    /// `None` while the window is zero-sized (minimized).
    pub fn recreate(
        &mut self,
        vsync: bool,
        table: &BindlessTable,
    ) -> GpuResult<Option<(UVec2, vk::Image)>> {
        let res = self.surface_res()?;
        if res.x == 0 || res.y == 0 {
            return Ok(None);
        }
        // Drop the virtual RT first; its replacement takes the same slot.
        self.virtual_rt = None;
        self.build_swapchain(res, vsync)?;
        let rt_image = self.build_virtual_rt(res, table)?;
        self.needs_recreate = false;
        Ok(Some((res, rt_image)))
    }

    fn build_swapchain(&mut self, res: UVec2, vsync: bool) -> GpuResult<()> {
        let pdevice = self.device.physical_device().vk_handle();
        let caps = self.surface.capabilities(pdevice)?;

        let mut min_image_count = (GPU_NUM_CONCURRENT_SUBMITS as u32).max(caps.min_image_count);
        if caps.max_image_count != 0 {
            min_image_count = min_image_count.min(caps.max_image_count);
        }
        let present_mode = if vsync {
            vk::PresentModeKHR::FIFO
        } else if self.allow_tearing && self.tearing_supported {
            vk::PresentModeKHR::IMMEDIATE
        } else {
            vk::PresentModeKHR::FIFO
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle)
            .min_image_count(min_image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(vk::Extent2D {
                width: res.x,
                height: res.y,
            })
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let loader = self.device.swapchain_loader();
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { loader.destroy_swapchain(old_swapchain, None) };
        }
        let images = unsafe { loader.get_swapchain_images(swapchain)? };

        // Semaphores are rebuilt wholesale; the caller flushed the queue.
        self.acquire_semaphores.clear();
        for _ in 0..GPU_NUM_CONCURRENT_SUBMITS {
            self.acquire_semaphores
                .push(Semaphore::new_binary(self.device.clone())?);
        }
        self.acquire_cursor = 0;
        self.present_semaphores.clear();
        for _ in 0..images.len() {
            self.present_semaphores
                .push(Semaphore::new_binary(self.device.clone())?);
        }

        tracing::info!(
            width = res.x,
            height = res.y,
            image_count = images.len(),
            ?present_mode,
            "created swapchain"
        );
        self.swapchain = swapchain;
        self.images = images;
        self.res = res;
        self.vsync = vsync;
        Ok(())
    }

    fn build_virtual_rt(&mut self, res: UVec2, table: &BindlessTable) -> GpuResult<vk::Image> {
        let image = Image::new_private(
            self.allocator.clone(),
            res,
            VIRTUAL_RT_FORMAT,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;
        let view = image.create_view(&self.device)?;
        let handle = image.vk_handle();
        self.virtual_rt = Some(VirtualRt { image, view, res });
        table.write_slot(
            GpuRWTex::SWAPCHAIN.index(),
            &self.virtual_rt.as_ref().unwrap().view,
        );
        Ok(handle)
    }
}

impl Drop for SwapchainCtx {
    fn drop(&mut self) {
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.device
                    .swapchain_loader()
                    .destroy_swapchain(self.swapchain, None);
            }
        }
    }
}

fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];
    for format in preferred {
        if let Some(found) = formats.iter().find(|f| {
            f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            return *found;
        }
    }
    formats.first().copied().unwrap_or(vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    })
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn create_platform_surface(
    instance: &Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> GpuResult<vk::SurfaceKHR> {
    let entry = instance.entry();
    let surface = match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(window)) => {
            let info = vk::Win32SurfaceCreateInfoKHR::default()
                .hinstance(window.hinstance.map(|h| h.get()).unwrap_or_default())
                .hwnd(window.hwnd.get());
            unsafe {
                khr::win32_surface::Instance::new(entry, instance)
                    .create_win32_surface(&info, None)?
            }
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let info = vk::WaylandSurfaceCreateInfoKHR::default()
                .display(display.display.as_ptr())
                .surface(window.surface.as_ptr());
            unsafe {
                khr::wayland_surface::Instance::new(entry, instance)
                    .create_wayland_surface(&info, None)?
            }
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let info = vk::XlibSurfaceCreateInfoKHR::default()
                .dpy(
                    display
                        .display
                        .map(|d| d.as_ptr())
                        .unwrap_or(std::ptr::null_mut()) as *mut _,
                )
                .window(window.window);
            unsafe {
                khr::xlib_surface::Instance::new(entry, instance)
                    .create_xlib_surface(&info, None)?
            }
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let info = vk::XcbSurfaceCreateInfoKHR::default()
                .connection(
                    display
                        .connection
                        .map(|c| c.as_ptr())
                        .unwrap_or(std::ptr::null_mut()),
                )
                .window(window.window.get());
            unsafe {
                khr::xcb_surface::Instance::new(entry, instance)
                    .create_xcb_surface(&info, None)?
            }
        }
        (RawDisplayHandle::Android(_), RawWindowHandle::AndroidNdk(window)) => {
            let info = vk::AndroidSurfaceCreateInfoKHR::default()
                .window(window.a_native_window.as_ptr());
            unsafe {
                khr::android_surface::Instance::new(entry, instance)
                    .create_android_surface(&info, None)?
            }
        }
        _ => {
            return Err(GpuError::Config(
                "unsupported window system for swapchain creation".into(),
            ))
        }
    };
    Ok(surface)
}
