//! The runtime façade.
//!
//! [`Gpu`] owns every subsystem and exposes the whole public surface:
//! lifecycle, heap allocation, kernels, textures, the per-frame queue
//! calls, submission and presentation. All entry points must be called
//! from one thread; the only blocking calls are [`Gpu::submit`] (when the
//! command ring is full) and [`Gpu::flush`].

use ash::vk;
use glam::{UVec2, UVec3};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::alloc::Allocator;
use crate::descriptor::BindlessTable;
use crate::device::Device;
use crate::error::{GpuError, GpuResult};
use crate::heap::{GpuHeap, GpuPtr, GPU_HEAP_SYSTEM_RESERVED};
use crate::instance::Instance;
use crate::kernel::{GpuKernel, GpuKernelDesc, KernelCompiler, KernelInfo};
use crate::physical_device::PhysicalDevice;
use crate::pool::Pool;
use crate::queue::Queue;
use crate::staging::{RingStagingHeap, StagingDirection, STAGING_ALIGN};
use crate::submit::{GpuTicket, SubmitRing};
use crate::swapchain::{Surface, SwapchainCtx};
use crate::texture::{GpuRWTex, GpuRWTexDesc, RwTexturePool};

/// The host window a swapchain should present to.
#[derive(Debug, Clone, Copy)]
pub struct NativeWindow {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

/// Init-time configuration. All sizes are clamped to their documented
/// ranges before use; see [`GpuConfig::resolved`].
#[derive(Debug, Clone)]
pub struct GpuConfig {
    /// Size of the GPU heap, clamped to
    /// `[GPU_HEAP_SYSTEM_RESERVED, u32::MAX]`.
    pub gpu_heap_size_bytes: u32,
    /// Upload ring heap size, rounded up to 256 bytes.
    pub upload_heap_size_bytes: u32,
    /// Download ring heap size, rounded up to 256 bytes.
    pub download_heap_size_bytes: u32,
    /// Capacity of the download ticket pool.
    pub max_num_concurrent_downloads: u32,
    /// Size of the bindless texture table, clamped to `[1, 16384]`.
    pub max_num_textures: u32,
    /// Capacity of the kernel pool.
    pub max_num_kernels: u32,
    /// Present target; `None` runs headless (no swapchain subsystem).
    pub window: Option<NativeWindow>,
    /// Allow tearing presents; effective only when the surface supports an
    /// immediate present mode.
    pub allow_tearing: bool,
    /// Enable the API debug layer and object names.
    pub debug_mode: bool,
    /// Additionally enable GPU-assisted shader validation.
    pub debug_shader_validation: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            gpu_heap_size_bytes: 256 * 1024 * 1024,
            upload_heap_size_bytes: 32 * 1024 * 1024,
            download_heap_size_bytes: 32 * 1024 * 1024,
            max_num_concurrent_downloads: 64,
            max_num_textures: 1024,
            max_num_kernels: 128,
            window: None,
            allow_tearing: false,
            debug_mode: false,
            debug_shader_validation: false,
        }
    }
}

impl GpuConfig {
    /// Applies the documented clamps and roundings.
    pub fn resolved(&self) -> GpuConfig {
        GpuConfig {
            gpu_heap_size_bytes: self.gpu_heap_size_bytes.max(GPU_HEAP_SYSTEM_RESERVED),
            upload_heap_size_bytes: self
                .upload_heap_size_bytes
                .max(STAGING_ALIGN as u32)
                .next_multiple_of(STAGING_ALIGN as u32),
            download_heap_size_bytes: self
                .download_heap_size_bytes
                .max(STAGING_ALIGN as u32)
                .next_multiple_of(STAGING_ALIGN as u32),
            max_num_concurrent_downloads: self.max_num_concurrent_downloads.clamp(1, 65535),
            max_num_textures: self.max_num_textures.clamp(1, 16384),
            max_num_kernels: self.max_num_kernels.clamp(1, 65535),
            ..self.clone()
        }
    }
}

/// The runtime. Construction brings up the whole backend; dropping it
/// flushes outstanding GPU work and releases everything in reverse
/// construction order.
pub struct Gpu {
    ring: SubmitRing,
    kernels: Pool<KernelInfo>,
    compiler: KernelCompiler,
    textures: RwTexturePool,
    swapchain: Option<SwapchainCtx>,
    table: BindlessTable,
    uploads: RingStagingHeap,
    downloads: RingStagingHeap,
    heap: GpuHeap,
    #[allow(dead_code)]
    allocator: Allocator,
    device: Device,
}

impl Gpu {
    /// Initializes the runtime.
    ///
    /// Ends with one internal submit (and present, when windowed) so the
    /// first application frame starts from a warm ring: a non-zero submit
    /// index and staging safe offsets.
    pub fn new(cfg: &GpuConfig) -> GpuResult<Gpu> {
        let mut cfg = cfg.resolved();
        if cfg.window.is_some() {
            // The virtual swapchain RT needs its reserved slot.
            cfg.max_num_textures = cfg.max_num_textures.max(2);
        }

        let instance = Instance::new(
            cfg.window.as_ref().map(|w| w.display),
            cfg.debug_mode,
            cfg.debug_shader_validation,
        )?;
        let physical_device = PhysicalDevice::select(&instance)?;
        tracing::info!(
            adapter = %physical_device.device_name().to_string_lossy(),
            "selected adapter"
        );

        let surface = match &cfg.window {
            Some(window) => Some(Surface::create(
                instance.clone(),
                window.display,
                window.window,
            )?),
            None => None,
        };

        let pdevice_handle = physical_device.vk_handle();
        let device = Device::create(
            physical_device,
            surface.is_some(),
            cfg.debug_mode,
            |family| match &surface {
                Some(surface) => surface.supports_queue_family(pdevice_handle, family),
                None => true,
            },
        )?;
        let queue = Queue::new(device.clone());
        let allocator = Allocator::new(device.clone())?;

        let heap = GpuHeap::new(allocator.clone(), cfg.gpu_heap_size_bytes)?;
        device.set_debug_name(heap.vk_handle(), c"scoria gpu heap");
        let uploads = RingStagingHeap::new(
            allocator.clone(),
            StagingDirection::Upload,
            cfg.upload_heap_size_bytes as u64,
        )?;
        device.set_debug_name(uploads.vk_handle(), c"scoria upload heap");
        let downloads = RingStagingHeap::new(
            allocator.clone(),
            StagingDirection::Download,
            cfg.download_heap_size_bytes as u64,
        )?;
        device.set_debug_name(downloads.vk_handle(), c"scoria download heap");

        let table = BindlessTable::new(device.clone(), allocator.clone(), cfg.max_num_textures)?;
        table.write_heap_buffer(heap.vk_handle(), heap.size() as vk::DeviceSize);
        let textures =
            RwTexturePool::new(device.clone(), allocator.clone(), cfg.max_num_textures);

        let compiler = KernelCompiler::new(device.clone())?;
        let kernels = Pool::with_capacity(cfg.max_num_kernels);

        let ring = SubmitRing::new(device.clone(), queue, cfg.max_num_concurrent_downloads)?;
        ring.transition_image_initial(table.null_image_handle());

        let swapchain = match surface {
            Some(surface) => {
                let (ctx, rt_image) = SwapchainCtx::new(
                    device.clone(),
                    allocator.clone(),
                    surface,
                    cfg.allow_tearing,
                    &table,
                )?;
                ring.transition_image_initial(rt_image);
                Some(ctx)
            }
            None => None,
        };

        let mut gpu = Gpu {
            ring,
            kernels,
            compiler,
            textures,
            swapchain,
            table,
            uploads,
            downloads,
            heap,
            allocator,
            device,
        };
        // Prime the ring so the first real frame sees submit index >= 1.
        gpu.submit();
        if gpu.swapchain.is_some() {
            gpu.swapchain_present(false);
        }
        Ok(gpu)
    }

    // --- Memory ---------------------------------------------------------

    /// Allocates `num_bytes` from the GPU heap, 64-byte aligned. Returns
    /// [`GpuPtr::NULL`] on exhaustion or a zero-sized request.
    pub fn malloc(&mut self, num_bytes: u32) -> GpuPtr {
        self.heap.malloc(num_bytes)
    }

    /// Releases a pointer. Currently a no-op behind a stable contract.
    pub fn free(&mut self, ptr: GpuPtr) {
        self.heap.free(ptr);
    }

    // --- Kernels --------------------------------------------------------

    /// Compiles a kernel and readies it for dispatch.
    pub fn kernel_init(&mut self, desc: &GpuKernelDesc<'_>) -> GpuResult<GpuKernel> {
        let info = self.compiler.compile(desc, self.table.layout())?;
        self.kernels
            .insert(info)
            .map(GpuKernel)
            .ok_or(GpuError::PoolExhausted("kernel"))
    }

    /// Destroys a kernel. The pipeline itself is released once every
    /// command list that may reference it has completed.
    pub fn kernel_destroy(&mut self, kernel: GpuKernel) {
        match self.kernels.remove(kernel.0) {
            Some(info) => self.ring.retire_resource(Box::new(info)),
            None => tracing::warn!("kernel_destroy with a stale or null handle"),
        }
    }

    /// The thread-group dimensions the kernel declared.
    pub fn kernel_group_dims(&self, kernel: GpuKernel) -> GpuResult<UVec3> {
        self.kernels
            .get(kernel.0)
            .map(|info| info.group_dims)
            .ok_or(GpuError::InvalidHandle)
    }

    /// 2-D form of [`kernel_group_dims`](Self::kernel_group_dims); the
    /// kernel's z dimension must be 1.
    pub fn kernel_group_dims2(&self, kernel: GpuKernel) -> GpuResult<UVec2> {
        let dims = self.kernel_group_dims(kernel)?;
        debug_assert_eq!(dims.z, 1);
        Ok(UVec2::new(dims.x, dims.y))
    }

    /// 1-D form; the kernel's y and z dimensions must be 1.
    pub fn kernel_group_dims1(&self, kernel: GpuKernel) -> GpuResult<u32> {
        let dims = self.kernel_group_dims(kernel)?;
        debug_assert_eq!((dims.y, dims.z), (1, 1));
        Ok(dims.x)
    }

    // --- Textures -------------------------------------------------------

    /// Creates an RW texture and publishes it in the bindless table.
    pub fn rwtex_init(&mut self, desc: &GpuRWTexDesc) -> GpuResult<GpuRWTex> {
        let swapchain_res = self.swapchain.as_ref().map(|sc| sc.res());
        let (tex, image) = self
            .textures
            .create(desc.clone(), swapchain_res, &self.table)?;
        self.ring.transition_image_initial(image);
        Ok(tex)
    }

    /// Destroys an RW texture; its slot reads as the null texture until
    /// reused. The backing image is released once in-flight command lists
    /// complete.
    pub fn rwtex_destroy(&mut self, tex: GpuRWTex) {
        match self.textures.destroy(tex, &self.table) {
            Ok(texture) => self.ring.retire_resource(Box::new(texture)),
            Err(err) => tracing::warn!(?err, "rwtex_destroy skipped"),
        }
    }

    /// Changes a swapchain-relative texture's scale rule and rebuilds it
    /// in place (same slot, new resource). Stops the world: flushes before
    /// replacing the resource. No-op when the scale is unchanged.
    pub fn rwtex_set_relative_scale(&mut self, tex: GpuRWTex, scale: f32) -> GpuResult<()> {
        let desc = self.textures.get_desc(tex)?;
        if desc.swapchain_relative
            && desc.relative_scale == scale
            && desc.relative_fixed_height == 0
        {
            return Ok(());
        }
        let swapchain_res = self.swapchain_res_or_err()?;
        self.flush();
        let rebuilt =
            self.textures
                .set_relative_scale(tex, scale, swapchain_res, &self.table)?;
        if let Some(image) = rebuilt {
            self.ring.transition_image_initial(image);
        }
        Ok(())
    }

    /// Changes a swapchain-relative texture's fixed-height rule and
    /// rebuilds it in place. No-op when the height is unchanged.
    pub fn rwtex_set_relative_fixed_height(
        &mut self,
        tex: GpuRWTex,
        height: u32,
    ) -> GpuResult<()> {
        let desc = self.textures.get_desc(tex)?;
        if desc.swapchain_relative
            && desc.relative_fixed_height == height
            && desc.relative_scale == 0.0
        {
            return Ok(());
        }
        let swapchain_res = self.swapchain_res_or_err()?;
        self.flush();
        let rebuilt =
            self.textures
                .set_relative_fixed_height(tex, height, swapchain_res, &self.table)?;
        if let Some(image) = rebuilt {
            self.ring.transition_image_initial(image);
        }
        Ok(())
    }

    pub fn rwtex_get_desc(&self, tex: GpuRWTex) -> GpuResult<GpuRWTexDesc> {
        self.textures.get_desc(tex)
    }

    pub fn rwtex_get_res(&self, tex: GpuRWTex) -> GpuResult<UVec2> {
        if tex == GpuRWTex::SWAPCHAIN {
            return self
                .swapchain
                .as_ref()
                .and_then(|sc| sc.rt_res())
                .ok_or(GpuError::NoSwapchain);
        }
        self.textures.get_res(tex)
    }

    // --- Per-frame queue calls ------------------------------------------

    /// Stages `src` into the upload heap and queues a copy into the GPU
    /// heap at `dst`. The data is captured immediately; `src` need not
    /// outlive the call. A zero-length `src` is a no-op.
    pub fn queue_memcpy_upload(&mut self, dst: GpuPtr, src: &[u8]) {
        self.ring
            .queue_upload(&self.heap, &mut self.uploads, dst, src);
    }

    /// Queues a copy of `[src, src + num_bytes)` out of the GPU heap and
    /// returns a ticket redeemable once the submission completes.
    /// `num_bytes == 0` yields a null ticket.
    pub fn queue_memcpy_download(&mut self, src: GpuPtr, num_bytes: u32) -> GpuTicket {
        self.ring
            .queue_download(&self.heap, &mut self.downloads, src, num_bytes)
    }

    /// Copies a completed download into `dst` and frees the ticket.
    /// Fails while the recording submission has not completed, on a size
    /// mismatch, or on a stale ticket.
    pub fn get_downloaded(&mut self, ticket: GpuTicket, dst: &mut [u8]) -> GpuResult<()> {
        self.ring.get_downloaded(&self.downloads, ticket, dst)
    }

    /// Queues a kernel dispatch. `params` must match the kernel's declared
    /// launch-parameter block size exactly (empty for kernels without
    /// one), and every group count must be non-zero; violations skip the
    /// dispatch with a diagnostic.
    pub fn queue_dispatch(&mut self, kernel: GpuKernel, num_groups: UVec3, params: &[u8]) {
        self.ring.queue_dispatch(
            &self.heap,
            &self.kernels,
            &self.table,
            kernel,
            num_groups,
            params,
        );
    }

    /// Typed convenience for [`queue_dispatch`](Self::queue_dispatch):
    /// passes `params` as its raw bytes.
    pub fn queue_dispatch_with<T: Copy>(
        &mut self,
        kernel: GpuKernel,
        num_groups: UVec3,
        params: &T,
    ) {
        let bytes = unsafe {
            std::slice::from_raw_parts(params as *const T as *const u8, std::mem::size_of::<T>())
        };
        self.queue_dispatch(kernel, num_groups, bytes);
    }

    /// Orders heap writes between dispatches. Required between dispatches
    /// with overlapping writes or read-after-write on the same memory;
    /// read-after-read needs none. The runtime never infers hazards.
    pub fn queue_heap_barrier(&mut self) {
        self.ring.queue_heap_barrier(&self.heap);
    }

    /// Orders storage access to one RW texture between dispatches.
    pub fn queue_rwtex_barrier(&mut self, tex: GpuRWTex) {
        let image = if tex == GpuRWTex::SWAPCHAIN {
            match self.swapchain.as_ref().and_then(|sc| sc.rt_image()) {
                Some(image) => image,
                None => {
                    tracing::warn!("rwtex barrier on the swapchain RT without a swapchain");
                    return;
                }
            }
        } else {
            match self.textures.image_handle(tex) {
                Ok(image) => image,
                Err(err) => {
                    tracing::warn!(?err, "rwtex barrier skipped");
                    return;
                }
            }
        };
        self.ring.queue_rwtex_barrier(image);
    }

    /// Bulk form: orders storage access to every RW texture at once.
    pub fn queue_rwtex_barriers(&mut self) {
        self.ring.queue_rwtex_barriers();
    }

    /// Writes one queue timestamp into the heap at `dst` (8 bytes,
    /// 8-aligned); download it like any other heap data and divide by
    /// [`timestamp_freq`](Self::timestamp_freq) for seconds.
    pub fn queue_take_timestamp(&mut self, dst: GpuPtr) {
        self.ring.queue_take_timestamp(&self.heap, dst);
    }

    /// Timestamp ticks per second reported by the queue.
    pub fn timestamp_freq(&self) -> u64 {
        self.device.physical_device().timestamp_frequency()
    }

    // --- Submission -----------------------------------------------------

    /// Closes the current command list, executes it, and advances the
    /// ring. Blocks when the GPU is [`GPU_NUM_CONCURRENT_SUBMITS`]
    /// submissions behind. When a swapchain exists, the virtual RT is
    /// blitted into a freshly acquired backbuffer first.
    ///
    /// [`GPU_NUM_CONCURRENT_SUBMITS`]: crate::GPU_NUM_CONCURRENT_SUBMITS
    pub fn submit(&mut self) {
        let mut wait_acquire = None;
        let mut signal_present = None;
        if let Some(swapchain) = &mut self.swapchain {
            if let Some((acquire, present)) = swapchain.record_backbuffer_blit(self.ring.cmd()) {
                wait_acquire = Some(acquire);
                signal_present = Some(present);
            }
        }
        if let Err(err) =
            self.ring
                .submit(wait_acquire, signal_present, &mut self.uploads, &mut self.downloads)
        {
            tracing::error!(?err, "submit failed; subsequent behavior is undefined");
        }
    }

    /// The current swapchain resolution, or zero when headless.
    pub fn swapchain_get_res(&self) -> UVec2 {
        self.swapchain
            .as_ref()
            .map(|sc| sc.res())
            .unwrap_or(UVec2::ZERO)
    }

    /// Presents the backbuffer blitted at the last [`submit`](Self::submit).
    ///
    /// Detects window resizes (and vsync changes, which are a swapchain
    /// property here): the runtime then flushes, rebuilds the swapchain
    /// and virtual RT in place, and rebuilds every swapchain-relative
    /// texture at the new resolution. Texture handles and descriptor
    /// slots survive the rebuild.
    pub fn swapchain_present(&mut self, vsync: bool) {
        if self.swapchain.is_none() {
            tracing::warn!("swapchain_present without a swapchain");
            return;
        }

        {
            let swapchain = self.swapchain.as_mut().unwrap();
            swapchain.present(self.ring.queue());
        }

        let wants_recreate = self
            .swapchain
            .as_ref()
            .map(|sc| sc.wants_recreate(vsync))
            .unwrap_or(false);
        if !wants_recreate {
            return;
        }

        self.flush();
        let rebuilt = {
            let swapchain = self.swapchain.as_mut().unwrap();
            match swapchain.recreate(vsync, &self.table) {
                Ok(rebuilt) => rebuilt,
                Err(err) => {
                    tracing::error!(?err, "swapchain recreation failed");
                    return;
                }
            }
        };
        let Some((res, rt_image)) = rebuilt else {
            // Minimized; try again at the next present.
            return;
        };
        self.ring.transition_image_initial(rt_image);
        for image in self.textures.rebuild_swapchain_relative(res, &self.table) {
            self.ring.transition_image_initial(image);
        }
    }

    /// Blocks until all submitted GPU work has completed. Staged-but-
    /// unsubmitted commands stay queued.
    pub fn flush(&mut self) {
        if let Err(err) = self.ring.flush(&mut self.uploads, &mut self.downloads) {
            tracing::error!(?err, "flush failed; subsequent behavior is undefined");
        }
    }

    /// Monotonic submit counter, usable for per-frame indexing
    /// (`idx % GPU_NUM_CONCURRENT_SUBMITS`).
    ///
    /// [`GPU_NUM_CONCURRENT_SUBMITS`]: crate::GPU_NUM_CONCURRENT_SUBMITS
    pub fn curr_submit_idx(&self) -> u64 {
        self.ring.curr_submit_idx()
    }

    fn swapchain_res_or_err(&self) -> GpuResult<UVec2> {
        self.swapchain
            .as_ref()
            .map(|sc| sc.res())
            .ok_or(GpuError::NoSwapchain)
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        self.flush();
        tracing::info!("gpu runtime destroyed");
        // Fields drop in declaration order; every resource holds its
        // device or allocator, so release order is structural.
    }
}

/// Device-backed test support, shared by the scenario tests across
/// modules. Building the runtime needs a Vulkan implementation with the
/// required features; hosts without one skip those tests cleanly.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) fn small_cfg() -> GpuConfig {
        GpuConfig {
            gpu_heap_size_bytes: 64 * 1024 * 1024,
            upload_heap_size_bytes: 1024 * 1024,
            download_heap_size_bytes: 1024 * 1024,
            ..Default::default()
        }
    }

    pub(crate) fn try_init(cfg: &GpuConfig) -> Option<Gpu> {
        match Gpu::new(cfg) {
            Ok(gpu) => Some(gpu),
            Err(err) => {
                eprintln!("skipping: GPU runtime unavailable ({err})");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{small_cfg, try_init};
    use super::*;
    use crate::staging::STAGING_ALIGN;

    #[test]
    fn config_clamps_apply() {
        let cfg = GpuConfig {
            gpu_heap_size_bytes: 0,
            upload_heap_size_bytes: 100,
            download_heap_size_bytes: 0,
            max_num_textures: 1 << 20,
            max_num_kernels: 0,
            max_num_concurrent_downloads: 0,
            ..Default::default()
        }
        .resolved();
        assert_eq!(cfg.gpu_heap_size_bytes, GPU_HEAP_SYSTEM_RESERVED);
        assert_eq!(cfg.upload_heap_size_bytes, STAGING_ALIGN as u32);
        assert_eq!(cfg.download_heap_size_bytes, STAGING_ALIGN as u32);
        assert_eq!(cfg.max_num_textures, 16384);
        assert_eq!(cfg.max_num_kernels, 1);
        assert_eq!(cfg.max_num_concurrent_downloads, 1);
    }

    #[test]
    fn config_rounds_staging_sizes_to_alignment() {
        let cfg = GpuConfig {
            upload_heap_size_bytes: 1000,
            download_heap_size_bytes: 257,
            ..Default::default()
        }
        .resolved();
        assert_eq!(cfg.upload_heap_size_bytes, 1024);
        assert_eq!(cfg.download_heap_size_bytes, 512);
    }

    #[test]
    fn defaults_survive_resolution() {
        let cfg = GpuConfig::default();
        let resolved = cfg.resolved();
        assert_eq!(resolved.gpu_heap_size_bytes, cfg.gpu_heap_size_bytes);
        assert_eq!(resolved.max_num_textures, cfg.max_num_textures);
    }

    #[test]
    fn malloc_respects_alignment_and_reserved_prefix() {
        let Some(mut gpu) = try_init(&small_cfg()) else {
            return;
        };
        let mut previous = 0u32;
        for size in [1u32, 63, 64, 65, 4096] {
            let ptr = gpu.malloc(size);
            assert!(!ptr.is_null());
            assert!(ptr.offset() >= GPU_HEAP_SYSTEM_RESERVED);
            assert_eq!(ptr.offset() % crate::GPU_MALLOC_ALIGN, 0);
            assert!(ptr.offset() > previous);
            previous = ptr.offset();
        }
        assert!(gpu.malloc(0).is_null());
    }

    #[test]
    fn zero_sized_transfers_are_no_ops() {
        let Some(mut gpu) = try_init(&small_cfg()) else {
            return;
        };
        let ptr = gpu.malloc(64);
        gpu.queue_memcpy_upload(ptr, &[]);
        let ticket = gpu.queue_memcpy_download(ptr, 0);
        assert!(ticket.is_null());
        gpu.submit();
        gpu.flush();
    }

    #[test]
    fn timestamp_round_trip() {
        let Some(mut gpu) = try_init(&small_cfg()) else {
            return;
        };
        let freq = gpu.timestamp_freq();
        assert!(freq > 0);

        let ptr = gpu.malloc(8);
        gpu.queue_take_timestamp(ptr);
        let ticket = gpu.queue_memcpy_download(ptr, 8);
        gpu.submit();
        gpu.flush();

        let mut out = [0u8; 8];
        gpu.get_downloaded(ticket, &mut out).unwrap();
        let ticks = u64::from_le_bytes(out);
        assert!(ticks > 0);
    }
}
