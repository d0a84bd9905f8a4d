//! Engine-level error type.
//!
//! Every fallible engine operation returns [`EngineError`]. Failures are
//! reported, never papered over: a failed call leaves the grid exactly as
//! it was before the call.

use std::time::Duration;

use crate::compute::gpu::GpuError;
use crate::pattern::PatternError;
use crate::schema::ConfigError;

/// Errors produced by grids, executors and backends.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Grid dimensions {width}x{height}x{depth} must all be non-zero")]
    InvalidDimensions { width: u32, height: u32, depth: u32 },

    #[error("Coordinate ({x}, {y}, {z}) is outside the grid")]
    OutOfRange { x: u32, y: u32, z: u32 },

    #[error("Unsupported rule set: {0}")]
    UnsupportedRuleSet(String),

    #[error("Pattern format error: {0}")]
    PatternFormat(#[from] PatternError),

    #[error("Failed to allocate buffers for {cells} cells")]
    AllocationFailure { cells: u128 },

    #[error("Step aborted: {0}")]
    StepAborted(String),

    #[error("Step took {elapsed:?}, exceeding the {limit:?} limit; result discarded")]
    StepTimedOut { elapsed: Duration, limit: Duration },

    #[error("Maximum cell age {0} must be between 1 and 32767")]
    InvalidMaxAge(u16),

    #[error("Density {0} is outside [0, 1]")]
    InvalidDensity(f64),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("GPU backend error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend has not been initialized")]
    NotInitialized,
}
