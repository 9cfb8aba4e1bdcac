//! # Scoria
//!
//! A thin, compute-first GPU runtime over Vulkan with a CUDA-style
//! programming model:
//!
//! - One large **GPU heap**, addressed from kernels and the host with a
//!   flat 32-bit pointer ([`GpuPtr`]).
//! - A pool of **compute kernels** compiled at runtime from GLSL and
//!   dispatched with inline launch parameters ([`GpuKernel`]).
//! - A small **bindless RW-texture table** indexed directly from kernel
//!   code ([`GpuRWTex`]).
//! - An optional **swapchain surface** driven through a virtual RW
//!   texture, so kernels render by writing a storage image.
//!
//! Work is recorded into a ring of command lists and submitted with
//! [`Gpu::submit`]; uploads, downloads and dispatches queued between two
//! submits execute in order on a single GPU queue. Downloads come back
//! through tickets ([`GpuTicket`]) that become redeemable once their
//! submission completes.
//!
//! ## Quick start
//!
//! ```no_run
//! use scoria::{Gpu, GpuConfig, GpuKernelDesc, KernelSource};
//! use scoria::glam::UVec3;
//!
//! let mut gpu = Gpu::new(&GpuConfig::default()).unwrap();
//!
//! let ptr = gpu.malloc(1024);
//! gpu.queue_memcpy_upload(ptr, &[7u8; 1024]);
//!
//! let kernel = gpu
//!     .kernel_init(&GpuKernelDesc {
//!         name: "double",
//!         source: KernelSource::Source(
//!             r#"
//!             layout(local_size_x = 256) in;
//!             layout(push_constant) uniform Params { GpuPtr data; } params;
//!             void main() {
//!                 GpuPtr elem = params.data + gl_GlobalInvocationID.x * 4;
//!                 ptr_store_u32(elem, ptr_load_u32(elem) * 2);
//!             }
//!             "#,
//!         ),
//!         defines: &[],
//!     })
//!     .unwrap();
//!
//! gpu.queue_dispatch_with(kernel, UVec3::new(1, 1, 1), &ptr);
//! let ticket = gpu.queue_memcpy_download(ptr, 1024);
//! gpu.submit();
//! gpu.flush();
//!
//! let mut bytes = [0u8; 1024];
//! gpu.get_downloaded(ticket, &mut bytes).unwrap();
//! assert_eq!(bytes[0], 14);
//! ```
//!
//! ## Threading
//!
//! The runtime is single-threaded by contract: every [`Gpu`] entry point
//! must be called from the same thread. The GPU is an asynchronous
//! executor behind one queue; the only blocking calls are [`Gpu::submit`]
//! (when the command ring is full) and [`Gpu::flush`].
//!
//! ## Hazards
//!
//! The runtime does not infer data hazards between dispatches. Order
//! overlapping writes (or read-after-write) yourself with
//! [`Gpu::queue_heap_barrier`], [`Gpu::queue_rwtex_barrier`] or
//! [`Gpu::queue_rwtex_barriers`]; getting this wrong is undefined
//! behavior on the GPU timeline.

mod alloc;
mod buffer;
mod descriptor;
mod device;
mod error;
mod format;
mod gpu;
mod heap;
mod image;
mod instance;
mod kernel;
mod physical_device;
mod pool;
mod queue;
mod staging;
mod submit;
mod swapchain;
mod sync;
mod texture;

pub use error::{GpuError, GpuResult};
pub use format::GpuFormat;
pub use gpu::{Gpu, GpuConfig, NativeWindow};
pub use heap::{GpuPtr, GPU_HEAP_SYSTEM_RESERVED, GPU_MALLOC_ALIGN};
pub use kernel::{
    GpuKernel, GpuKernelDesc, KernelSource, GPU_KERNEL_DEFINE_MAX_LEN,
    GPU_KERNEL_MAX_NUM_DEFINES, GPU_LAUNCH_PARAMS_MAX_SIZE, KERNEL_PROLOG,
};
pub use submit::{GpuTicket, GPU_NUM_CONCURRENT_SUBMITS};
pub use texture::{
    calc_rwtex_res, GpuRWTex, GpuRWTexDesc, RWTEX_MAX_FIXED_HEIGHT, RWTEX_MAX_SCALE,
};

pub use ash;
pub use glam;
pub use raw_window_handle;

pub mod prelude {
    pub use crate::{
        Gpu, GpuConfig, GpuFormat, GpuKernel, GpuKernelDesc, GpuPtr, GpuRWTex, GpuRWTexDesc,
        GpuTicket, KernelSource, NativeWindow,
    };
    pub use glam::{UVec2, UVec3};
}
