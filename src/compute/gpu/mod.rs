//! GPU compute backend.
//!
//! Runs the generation step as a wgpu compute shader that applies the
//! same integer cell logic as the CPU executor.

mod backend;

pub use backend::GpuBackend;

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("Device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("Buffer readback was dropped before completing")]
    ReadbackLost,

    #[error("Grid of {cells} cells exceeds the device limit of {limit} cells")]
    GridTooLarge { cells: u64, limit: u64 },
}
