//! The submission engine.
//!
//! A ring of [`GPU_NUM_CONCURRENT_SUBMITS`] command slots keeps the CPU at
//! most that many frames ahead of the GPU. Each slot owns a transient
//! command pool with one primary command buffer and remembers, at the
//! moment it was submitted: the timeline value its completion will signal,
//! its submit index, and the upload/download ring heads. When the ring
//! comes back around, the engine waits for the slot's timeline value,
//! raises the staging safe offsets to `head + ring size`, bumps the
//! known-completed submit index, and resets the slot for recording.
//!
//! The GPU heap is tracked as being in exactly one logical state —
//! copy-destination, copy-source or storage access — and transitions are
//! emitted lazily right before an operation that needs a different state.
//! Hazards *between dispatches* are the caller's responsibility through the
//! explicit barrier calls; the engine never infers them.

use ash::vk;
use glam::UVec3;

use crate::descriptor::BindlessTable;
use crate::device::Device;
use crate::error::{GpuError, GpuResult};
use crate::heap::{GpuHeap, GpuPtr};
use crate::kernel::{GpuKernel, KernelInfo};
use crate::pool::{Handle, Pool};
use crate::queue::Queue;
use crate::staging::RingStagingHeap;
use crate::sync::Semaphore;

/// Depth of the command ring. The swapchain uses the same count for its
/// backbuffers so one constant governs both pipelines.
pub const GPU_NUM_CONCURRENT_SUBMITS: usize = 3;

/// An opaque handle to a pending download, redeemed once the recording
/// submission has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GpuTicket(pub(crate) Handle);

impl GpuTicket {
    pub const NULL: GpuTicket = GpuTicket(Handle::NULL);

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

pub(crate) struct PendingDownload {
    mapped_offset: u64,
    num_bytes: u32,
    submit_idx: u64,
}

/// Logical state of the GPU heap from the runtime's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeapState {
    Common,
    CopyDest,
    CopySource,
    UnorderedAccess,
}

impl HeapState {
    fn scope(self) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        match self {
            HeapState::Common => (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE),
            HeapState::CopyDest => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
            ),
            HeapState::CopySource => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_READ,
            ),
            HeapState::UnorderedAccess => (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
        }
    }
}

struct CmdSlot {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    /// Timeline value signalled when this slot's submission completes.
    /// 0 means the slot has never been submitted.
    fence_value: u64,
    submit_idx: u64,
    upload_head: u64,
    download_head: u64,
}

pub(crate) struct SubmitRing {
    device: Device,
    queue: Queue,
    fence: Semaphore,
    /// Value the next submit will signal; strictly increasing.
    fence_value: u64,
    slots: Vec<CmdSlot>,
    curr_submit_idx: u64,
    known_completed_submit_idx: u64,
    heap_state: HeapState,
    timestamp_query_pool: vk::QueryPool,
    downloads: Pool<PendingDownload>,
    /// Resources destroyed by the host while possibly still referenced by
    /// in-flight command lists, each stamped with the timeline value whose
    /// completion makes dropping them safe.
    graveyard: Vec<(u64, Box<dyn std::any::Any>)>,
}

impl SubmitRing {
    pub fn new(device: Device, queue: Queue, max_concurrent_downloads: u32) -> GpuResult<Self> {
        let fence = Semaphore::new_timeline(device.clone(), 0)?;

        let mut slots = Vec::with_capacity(GPU_NUM_CONCURRENT_SUBMITS);
        for _ in 0..GPU_NUM_CONCURRENT_SUBMITS {
            let pool = unsafe {
                device.create_command_pool(
                    &vk::CommandPoolCreateInfo::default()
                        .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                        .queue_family_index(queue.family_index()),
                    None,
                )?
            };
            let buffer = unsafe {
                device.allocate_command_buffers(
                    &vk::CommandBufferAllocateInfo::default()
                        .command_pool(pool)
                        .level(vk::CommandBufferLevel::PRIMARY)
                        .command_buffer_count(1),
                )?[0]
            };
            slots.push(CmdSlot {
                pool,
                buffer,
                fence_value: 0,
                submit_idx: 0,
                upload_head: 0,
                download_head: 0,
            });
        }

        let timestamp_query_pool = unsafe {
            device.create_query_pool(
                &vk::QueryPoolCreateInfo::default()
                    .query_type(vk::QueryType::TIMESTAMP)
                    .query_count(1),
                None,
            )?
        };

        // Slot 0 starts recording immediately.
        unsafe {
            device.begin_command_buffer(
                slots[0].buffer,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        Ok(Self {
            device,
            queue,
            fence,
            fence_value: 1,
            slots,
            curr_submit_idx: 0,
            known_completed_submit_idx: 0,
            heap_state: HeapState::Common,
            timestamp_query_pool,
            downloads: Pool::with_capacity(max_concurrent_downloads),
            graveyard: Vec::new(),
        })
    }

    /// Parks a resource until every command list that may reference it has
    /// completed. The resource drops during a later `submit` or `flush`.
    pub fn retire_resource(&mut self, resource: Box<dyn std::any::Any>) {
        self.graveyard.push((self.fence_value, resource));
    }

    fn collect_graveyard(&mut self, completed_fence_value: u64) {
        self.graveyard
            .retain(|(stamp, _)| *stamp > completed_fence_value);
    }

    pub fn curr_submit_idx(&self) -> u64 {
        self.curr_submit_idx
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// The command buffer currently recording.
    pub fn cmd(&self) -> vk::CommandBuffer {
        self.slots[(self.curr_submit_idx % GPU_NUM_CONCURRENT_SUBMITS as u64) as usize].buffer
    }

    /// Transitions a freshly created image from `UNDEFINED` to the
    /// `GENERAL` layout every kernel access assumes.
    pub fn transition_image_initial(&self, image: vk::Image) {
        let barrier = vk::ImageMemoryBarrier2 {
            src_stage_mask: vk::PipelineStageFlags2::NONE,
            src_access_mask: vk::AccessFlags2::NONE,
            dst_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER
                | vk::PipelineStageFlags2::TRANSFER,
            dst_access_mask: vk::AccessFlags2::SHADER_STORAGE_READ
                | vk::AccessFlags2::SHADER_STORAGE_WRITE
                | vk::AccessFlags2::TRANSFER_READ,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::GENERAL,
            image,
            subresource_range: full_color_range(),
            ..Default::default()
        };
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.cmd(), &dependency);
        }
    }

    /// Emits a lazy heap state transition when the next operation's
    /// required state differs from the tracked one.
    pub fn ensure_heap_state(&mut self, heap: &GpuHeap, target: HeapState) {
        if self.heap_state == target {
            return;
        }
        let (src_stage, src_access) = self.heap_state.scope();
        let (dst_stage, dst_access) = target.scope();
        let barrier = vk::BufferMemoryBarrier2 {
            src_stage_mask: src_stage,
            src_access_mask: src_access,
            dst_stage_mask: dst_stage,
            dst_access_mask: dst_access,
            buffer: heap.vk_handle(),
            offset: 0,
            size: vk::WHOLE_SIZE,
            ..Default::default()
        };
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.cmd(), &dependency);
        }
        self.heap_state = target;
    }

    /// Stages `src` into the upload ring and records the copy into the GPU
    /// heap at `dst`. Skips (with a diagnostic) on contract violations and
    /// on staging overflow.
    pub fn queue_upload(
        &mut self,
        heap: &GpuHeap,
        uploads: &mut RingStagingHeap,
        dst: GpuPtr,
        src: &[u8],
    ) {
        if src.is_empty() {
            return;
        }
        let num_bytes = src.len() as u64;
        if dst.is_null() || dst.offset() as u64 + num_bytes > heap.size() as u64 {
            tracing::warn!(
                dst = dst.offset(),
                num_bytes,
                "upload outside the GPU heap, skipping"
            );
            return;
        }
        let Some(range) = uploads.write(src) else {
            tracing::warn!(
                num_bytes,
                upload_heap_size = uploads.size(),
                "upload heap overflow: the CPU is writing faster than the GPU retires, skipping"
            );
            return;
        };
        self.ensure_heap_state(heap, HeapState::CopyDest);
        let region = vk::BufferCopy {
            src_offset: range.mapped_offset,
            dst_offset: dst.offset() as u64,
            size: num_bytes,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(self.cmd(), uploads.vk_handle(), heap.vk_handle(), &[region]);
        }
    }

    /// Records a copy of `[src, src + num_bytes)` into the download ring
    /// and returns the ticket that redeems it. Null ticket on a zero-sized
    /// request, contract violation, or overflow.
    pub fn queue_download(
        &mut self,
        heap: &GpuHeap,
        downloads: &mut RingStagingHeap,
        src: GpuPtr,
        num_bytes: u32,
    ) -> GpuTicket {
        if num_bytes == 0 {
            return GpuTicket::NULL;
        }
        if src.is_null() || src.offset() as u64 + num_bytes as u64 > heap.size() as u64 {
            tracing::warn!(
                src = src.offset(),
                num_bytes,
                "download outside the GPU heap, skipping"
            );
            return GpuTicket::NULL;
        }
        let Some(range) = downloads.reserve(num_bytes as u64) else {
            tracing::warn!(
                num_bytes,
                download_heap_size = downloads.size(),
                "download heap overflow: downloads are outpacing retrieval, skipping"
            );
            return GpuTicket::NULL;
        };
        let Some(handle) = self.downloads.insert(PendingDownload {
            mapped_offset: range.mapped_offset,
            num_bytes,
            submit_idx: self.curr_submit_idx,
        }) else {
            tracing::warn!("download ticket pool is full, skipping");
            return GpuTicket::NULL;
        };
        self.ensure_heap_state(heap, HeapState::CopySource);
        let region = vk::BufferCopy {
            src_offset: src.offset() as u64,
            dst_offset: range.mapped_offset,
            size: num_bytes as u64,
        };
        unsafe {
            self.device.cmd_copy_buffer(
                self.cmd(),
                heap.vk_handle(),
                downloads.vk_handle(),
                &[region],
            );
        }
        GpuTicket(handle)
    }

    /// Copies a completed download into `dst` and retires the ticket.
    pub fn get_downloaded(
        &mut self,
        downloads_heap: &RingStagingHeap,
        ticket: GpuTicket,
        dst: &mut [u8],
    ) -> GpuResult<()> {
        let pending = self.downloads.get(ticket.0).ok_or(GpuError::InvalidHandle)?;
        if pending.num_bytes as usize != dst.len() {
            return Err(GpuError::DownloadSizeMismatch {
                expected: pending.num_bytes,
                actual: dst.len() as u32,
            });
        }
        if pending.submit_idx > self.known_completed_submit_idx {
            return Err(GpuError::DownloadPending {
                submit_idx: pending.submit_idx,
                completed_idx: self.known_completed_submit_idx,
            });
        }
        downloads_heap.read(pending.mapped_offset, dst);
        self.downloads.remove(ticket.0);
        Ok(())
    }

    /// Binds and dispatches a kernel. The full root state is re-bound on
    /// every dispatch: pipeline, descriptor set, and launch parameters.
    pub fn queue_dispatch(
        &mut self,
        heap: &GpuHeap,
        kernels: &Pool<KernelInfo>,
        table: &BindlessTable,
        kernel: GpuKernel,
        num_groups: UVec3,
        params: &[u8],
    ) {
        let Some(info) = kernels.get(kernel.0) else {
            tracing::warn!("dispatch with a stale or null kernel handle, skipping");
            return;
        };
        if params.len() as u32 != info.launch_params_size {
            tracing::warn!(
                expected = info.launch_params_size,
                actual = params.len(),
                "launch-parameter size mismatch, skipping dispatch"
            );
            return;
        }
        if num_groups.x == 0 || num_groups.y == 0 || num_groups.z == 0 {
            tracing::warn!(?num_groups, "dispatch with a zero group count, skipping");
            return;
        }
        self.ensure_heap_state(heap, HeapState::UnorderedAccess);
        let cmd = self.cmd();
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, info.pipeline);
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                info.layout,
                0,
                &[table.set()],
                &[],
            );
            if !params.is_empty() {
                self.device.cmd_push_constants(
                    cmd,
                    info.layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    params,
                );
            }
            self.device
                .cmd_dispatch(cmd, num_groups.x, num_groups.y, num_groups.z);
        }
    }

    /// Orders storage access on the GPU heap between dispatches. The heap
    /// must already be in the storage-access state.
    pub fn queue_heap_barrier(&mut self, heap: &GpuHeap) {
        if self.heap_state != HeapState::UnorderedAccess {
            tracing::warn!(
                state = ?self.heap_state,
                "heap barrier requested outside storage-access state, skipping"
            );
            return;
        }
        let (stage, access) = HeapState::UnorderedAccess.scope();
        let barrier = vk::BufferMemoryBarrier2 {
            src_stage_mask: stage,
            src_access_mask: access,
            dst_stage_mask: stage,
            dst_access_mask: access,
            buffer: heap.vk_handle(),
            offset: 0,
            size: vk::WHOLE_SIZE,
            ..Default::default()
        };
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.cmd(), &dependency);
        }
    }

    /// Orders storage access on a single RW texture between dispatches.
    pub fn queue_rwtex_barrier(&mut self, image: vk::Image) {
        let (stage, access) = HeapState::UnorderedAccess.scope();
        let barrier = vk::ImageMemoryBarrier2 {
            src_stage_mask: stage,
            src_access_mask: access,
            dst_stage_mask: stage,
            dst_access_mask: access,
            old_layout: vk::ImageLayout::GENERAL,
            new_layout: vk::ImageLayout::GENERAL,
            image,
            subresource_range: full_color_range(),
            ..Default::default()
        };
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.cmd(), &dependency);
        }
    }

    /// Bulk form: orders storage access on every RW texture at once.
    pub fn queue_rwtex_barriers(&mut self) {
        let (stage, access) = HeapState::UnorderedAccess.scope();
        let barrier = vk::MemoryBarrier2 {
            src_stage_mask: stage,
            src_access_mask: access,
            dst_stage_mask: stage,
            dst_access_mask: access,
            ..Default::default()
        };
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().memory_barriers(&barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.cmd(), &dependency);
        }
    }

    /// Writes one queue timestamp into the GPU heap at `dst`, from where
    /// it can be downloaded like any other data.
    pub fn queue_take_timestamp(&mut self, heap: &GpuHeap, dst: GpuPtr) {
        if dst.is_null()
            || dst.offset() % 8 != 0
            || dst.offset() as u64 + 8 > heap.size() as u64
        {
            tracing::warn!(dst = dst.offset(), "invalid timestamp destination, skipping");
            return;
        }
        self.ensure_heap_state(heap, HeapState::CopyDest);
        let cmd = self.cmd();
        unsafe {
            self.device
                .cmd_reset_query_pool(cmd, self.timestamp_query_pool, 0, 1);
            self.device.cmd_write_timestamp2(
                cmd,
                vk::PipelineStageFlags2::ALL_COMMANDS,
                self.timestamp_query_pool,
                0,
            );
            self.device.cmd_copy_query_pool_results(
                cmd,
                self.timestamp_query_pool,
                0,
                1,
                heap.vk_handle(),
                dst.offset() as u64,
                8,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            );
        }
    }

    /// Closes and executes the current command list, then advances the
    /// ring, blocking if the next slot's submission has not completed.
    ///
    /// `wait_acquire` / `signal_present` wire the swapchain handover into
    /// the submission when a backbuffer blit was recorded this frame.
    pub fn submit(
        &mut self,
        wait_acquire: Option<vk::Semaphore>,
        signal_present: Option<vk::Semaphore>,
        uploads: &mut RingStagingHeap,
        downloads: &mut RingStagingHeap,
    ) -> GpuResult<()> {
        let curr = (self.curr_submit_idx % GPU_NUM_CONCURRENT_SUBMITS as u64) as usize;
        {
            let slot = &mut self.slots[curr];
            slot.upload_head = uploads.head();
            slot.download_head = downloads.head();
            slot.submit_idx = self.curr_submit_idx;
            slot.fence_value = self.fence_value;
        }
        let buffer = self.slots[curr].buffer;
        unsafe {
            self.device.end_command_buffer(buffer)?;
        }

        let command_buffers = [vk::CommandBufferSubmitInfo {
            command_buffer: buffer,
            ..Default::default()
        }];
        let mut signals = vec![vk::SemaphoreSubmitInfo {
            semaphore: self.fence.vk_handle(),
            value: self.fence_value,
            stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            ..Default::default()
        }];
        if let Some(semaphore) = signal_present {
            signals.push(vk::SemaphoreSubmitInfo {
                semaphore,
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                ..Default::default()
            });
        }
        let waits: Vec<vk::SemaphoreSubmitInfo> = wait_acquire
            .into_iter()
            .map(|semaphore| vk::SemaphoreSubmitInfo {
                semaphore,
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                ..Default::default()
            })
            .collect();
        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffers)
            .wait_semaphore_infos(&waits)
            .signal_semaphore_infos(&signals);
        self.queue.submit(&[submit])?;

        self.fence_value += 1;
        self.curr_submit_idx += 1;

        // Reuse the next slot, waiting out its in-flight submission first.
        let next = (self.curr_submit_idx % GPU_NUM_CONCURRENT_SUBMITS as u64) as usize;
        let (fence_value, submit_idx, upload_head, download_head) = {
            let slot = &self.slots[next];
            (
                slot.fence_value,
                slot.submit_idx,
                slot.upload_head,
                slot.download_head,
            )
        };
        if fence_value > 0 {
            self.fence.wait(fence_value, u64::MAX)?;
            self.known_completed_submit_idx = self.known_completed_submit_idx.max(submit_idx);
            uploads.retire(upload_head);
            downloads.retire(download_head);
            self.collect_graveyard(fence_value);
        }
        unsafe {
            self.device
                .reset_command_pool(self.slots[next].pool, vk::CommandPoolResetFlags::empty())?;
            self.device.begin_command_buffer(
                self.slots[next].buffer,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }
        Ok(())
    }

    /// Blocks until every submitted command list has completed, then
    /// retires all staging space and download tickets up to the present.
    pub fn flush(
        &mut self,
        uploads: &mut RingStagingHeap,
        downloads: &mut RingStagingHeap,
    ) -> GpuResult<()> {
        let signals = [vk::SemaphoreSubmitInfo {
            semaphore: self.fence.vk_handle(),
            value: self.fence_value,
            stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            ..Default::default()
        }];
        let submit = vk::SubmitInfo2::default().signal_semaphore_infos(&signals);
        self.queue.submit(&[submit])?;
        self.fence.wait(self.fence_value, u64::MAX)?;
        self.collect_graveyard(self.fence_value);
        self.fence_value += 1;

        self.known_completed_submit_idx = self
            .known_completed_submit_idx
            .max(self.curr_submit_idx.saturating_sub(1));
        if self.curr_submit_idx > 0 {
            let prev = ((self.curr_submit_idx - 1) % GPU_NUM_CONCURRENT_SUBMITS as u64) as usize;
            let (upload_head, download_head) =
                (self.slots[prev].upload_head, self.slots[prev].download_head);
            uploads.retire(upload_head);
            downloads.retire(download_head);
        }
        Ok(())
    }
}

impl Drop for SubmitRing {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_query_pool(self.timestamp_query_pool, None);
            for slot in &self.slots {
                self.device.destroy_command_pool(slot.pool, None);
            }
        }
    }
}

fn full_color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use glam::UVec3;

    use crate::gpu::testing::{small_cfg, try_init};
    use crate::{
        GpuConfig, GpuError, GpuKernelDesc, GpuPtr, KernelSource, GPU_NUM_CONCURRENT_SUBMITS,
    };

    /// The copy kernel runs single-threaded and walks backwards so the
    /// overlapping ranges in the echo scenario stay deterministic.
    const COPY_KERNEL: &str = r#"
layout(local_size_x = 1) in;

layout(push_constant) uniform Params {
    GpuPtr src;
    GpuPtr dst;
    uint num_words;
} params;

void main() {
    for (uint i = params.num_words; i > 0; i--) {
        uint word = ptr_load_u32(params.src + (i - 1) * 4);
        ptr_store_u32(params.dst + (i - 1) * 4, word);
    }
}
"#;

    #[derive(Clone, Copy)]
    #[repr(C)]
    struct CopyParams {
        src: GpuPtr,
        dst: GpuPtr,
        num_words: u32,
    }

    #[test]
    fn echo_upload_dispatch_download() {
        let Some(mut gpu) = try_init(&small_cfg()) else {
            return;
        };
        let ptr = gpu.malloc(24);
        assert!(!ptr.is_null());

        let bytes: Vec<u8> = (1..=16).collect();
        gpu.queue_memcpy_upload(ptr, &bytes);

        let kernel = gpu
            .kernel_init(&GpuKernelDesc {
                name: "copy",
                source: KernelSource::Source(COPY_KERNEL),
                defines: &[],
            })
            .expect("copy kernel should compile");
        assert_eq!(gpu.kernel_group_dims(kernel).unwrap(), UVec3::new(1, 1, 1));

        // Shift the 16 uploaded bytes up by 8.
        gpu.queue_dispatch_with(
            kernel,
            UVec3::ONE,
            &CopyParams {
                src: ptr,
                dst: ptr + 8,
                num_words: 4,
            },
        );
        gpu.queue_heap_barrier();
        let ticket = gpu.queue_memcpy_download(ptr, 24);
        assert!(!ticket.is_null());
        gpu.submit();
        gpu.flush();

        let mut result = [0u8; 24];
        gpu.get_downloaded(ticket, &mut result).unwrap();
        // Bytes below the copy destination are untouched.
        assert_eq!(&result[0..8], &bytes[0..8]);
        // The copy landed 8 bytes up.
        assert_eq!(&result[8..24], &bytes[..]);

        gpu.kernel_destroy(kernel);
    }

    #[test]
    fn download_is_ready_after_ring_depth_submits() {
        let Some(mut gpu) = try_init(&small_cfg()) else {
            return;
        };
        let ptr = gpu.malloc(64);
        gpu.queue_memcpy_upload(ptr, &[0xAB; 64]);

        let ticket = gpu.queue_memcpy_download(ptr, 64);
        let mut out = [0u8; 64];

        // Not ready while the recording submission is outstanding.
        gpu.submit();
        assert!(matches!(
            gpu.get_downloaded(ticket, &mut out),
            Err(GpuError::DownloadPending { .. })
        ));

        // After ring-depth submits the recording slot has been waited on.
        for _ in 1..GPU_NUM_CONCURRENT_SUBMITS {
            gpu.submit();
        }
        // A size mismatch is rejected without consuming the ticket.
        let mut short = [0u8; 32];
        assert!(matches!(
            gpu.get_downloaded(ticket, &mut short),
            Err(GpuError::DownloadSizeMismatch { .. })
        ));
        gpu.get_downloaded(ticket, &mut out).unwrap();
        assert_eq!(out, [0xAB; 64]);

        // The ticket is spent.
        assert!(gpu.get_downloaded(ticket, &mut out).is_err());
    }

    #[test]
    fn launch_param_size_mismatch_skips_the_dispatch() {
        let Some(mut gpu) = try_init(&small_cfg()) else {
            return;
        };
        let ptr = gpu.malloc(64);
        gpu.queue_memcpy_upload(ptr, &[5u8; 64]);

        let kernel = gpu
            .kernel_init(&GpuKernelDesc {
                name: "copy",
                source: KernelSource::Source(COPY_KERNEL),
                defines: &[],
            })
            .unwrap();

        // 8 bytes against a 12-byte block: rejected, nothing queued.
        gpu.queue_dispatch(kernel, UVec3::ONE, &[0u8; 8]);
        // Zero group counts: rejected.
        gpu.queue_dispatch_with(
            kernel,
            UVec3::new(0, 1, 1),
            &CopyParams {
                src: ptr,
                dst: ptr + 16,
                num_words: 4,
            },
        );
        // The correctly sized dispatch still works afterwards.
        gpu.queue_dispatch_with(
            kernel,
            UVec3::ONE,
            &CopyParams {
                src: ptr,
                dst: ptr + 16,
                num_words: 4,
            },
        );
        let ticket = gpu.queue_memcpy_download(ptr + 16, 16);
        gpu.submit();
        gpu.flush();

        let mut out = [0u8; 16];
        gpu.get_downloaded(ticket, &mut out).unwrap();
        assert_eq!(out, [5u8; 16]);

        gpu.kernel_destroy(kernel);
    }

    #[test]
    fn kernels_without_launch_params_take_empty_params_only() {
        let Some(mut gpu) = try_init(&small_cfg()) else {
            return;
        };
        let source = r#"
            layout(local_size_x = 64) in;
            void main() {
                if (gl_GlobalInvocationID.x == 0) {
                    ptr_store_u32(GPU_NULLPTR + 8388608, 0x12345678);
                }
            }
        "#;
        let kernel = gpu
            .kernel_init(&GpuKernelDesc {
                name: "no_params",
                source: KernelSource::Source(source),
                defines: &[],
            })
            .unwrap();

        // Passing parameter bytes to a parameterless kernel is rejected.
        gpu.queue_dispatch(kernel, UVec3::ONE, &[0u8; 4]);
        // The empty dispatch goes through.
        gpu.queue_dispatch(kernel, UVec3::ONE, &[]);
        gpu.submit();
        gpu.flush();
        gpu.kernel_destroy(kernel);
    }

    #[test]
    fn staging_ring_survives_sustained_upload_traffic() {
        // 16 uploads of 200 bytes against a 4 KiB upload heap, submitting
        // every 4. Each submission window stages 1 KiB; the heap covers
        // the ring depth of in-flight windows, so the ring wraps without
        // ever dropping an upload.
        let Some(mut gpu) = try_init(&GpuConfig {
            upload_heap_size_bytes: 4096,
            ..small_cfg()
        }) else {
            return;
        };
        let ptr = gpu.malloc(256);
        for round in 0..16u32 {
            let payload = [round as u8; 200];
            gpu.queue_memcpy_upload(ptr, &payload);
            if round % 4 == 3 {
                gpu.submit();
            }
        }
        gpu.flush();

        let ticket = gpu.queue_memcpy_download(ptr, 200);
        gpu.submit();
        gpu.flush();
        let mut out = [0u8; 200];
        gpu.get_downloaded(ticket, &mut out).unwrap();
        assert_eq!(out, [15u8; 200]);
    }
}
