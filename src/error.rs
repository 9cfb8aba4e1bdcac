//! Runtime error type.

use std::path::PathBuf;

use ash::vk;

/// Errors reported by the runtime.
///
/// Creation paths ([`Gpu::new`](crate::Gpu::new), kernel and texture init)
/// return these directly. Per-frame queue operations never abort the
/// process: contract violations are logged and the operation is skipped.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// The init configuration was rejected before touching the backend.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The Vulkan loader could not be found or initialized.
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    /// No adapter exposes the queue capabilities the runtime needs.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// The selected adapter is missing a required device feature.
    #[error("missing required device feature: {0}")]
    MissingFeature(&'static str),

    /// An underlying API call failed.
    #[error("vulkan call failed: {0}")]
    Vk(#[from] vk::Result),

    /// A kernel source file could not be read.
    #[error("failed to read kernel source {path:?}: {source}")]
    KernelSource {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The shader compiler rejected the kernel source.
    #[error("kernel `{name}` failed to compile: {message}")]
    KernelCompile { name: String, message: String },

    /// Reflection rejected the compiled kernel (bad launch-parameter block,
    /// forbidden resource declarations, missing group dimensions).
    #[error("kernel `{name}` rejected: {message}")]
    KernelReflection { name: String, message: String },

    /// A handle pool ran out of slots.
    #[error("{0} pool is full")]
    PoolExhausted(&'static str),

    /// A handle did not resolve to a live object.
    #[error("stale or invalid handle")]
    InvalidHandle,

    /// The download belonging to a ticket has not completed on the GPU yet.
    #[error("download has not completed yet (submit {submit_idx} > completed {completed_idx})")]
    DownloadPending { submit_idx: u64, completed_idx: u64 },

    /// The destination size passed to retrieval does not match the ticket.
    #[error("download size mismatch: ticket holds {expected} bytes, caller asked for {actual}")]
    DownloadSizeMismatch { expected: u32, actual: u32 },

    /// A texture descriptor violated the swapchain-relative rules.
    #[error("invalid texture descriptor: {0}")]
    TextureDesc(String),

    /// The operation needs a swapchain but none was configured.
    #[error("no swapchain: the runtime was initialized without a window")]
    NoSwapchain,
}

pub type GpuResult<T> = Result<T, GpuError>;
