//! Configuration types for Voxel Life simulations.

use serde::{Deserialize, Serialize};

use super::{BoundaryKind, NeighborRange, RulePreset, RuleSet};
use crate::compute::{CellParams, MAX_CELL_AGE};

/// Default number of steps between pushed metrics snapshots.
fn default_metrics_interval() -> u64 {
    60
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Grid width in cells (X dimension).
    pub width: u32,
    /// Grid height in cells (Y dimension).
    pub height: u32,
    /// Grid depth in cells (Z dimension).
    pub depth: u32,
    /// Rule set selection.
    pub rule: RuleConfig,
    /// Boundary handling for neighbor lookups.
    #[serde(default)]
    pub boundary: BoundaryKind,
    /// Worker threads for the CPU backend (0 = available parallelism).
    #[serde(default)]
    pub workers: usize,
    /// Steps between pushed metrics snapshots (0 disables push delivery).
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: u64,
    /// Per-cell age/energy bookkeeping.
    #[serde(default)]
    pub cell: CellParams,
    /// Compute backend.
    #[serde(default)]
    pub backend: BackendKind,
    /// Optional random initial state.
    #[serde(default)]
    pub seed: Option<SeedConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            depth: 64,
            rule: RuleConfig::Preset(RulePreset::R5766),
            boundary: BoundaryKind::Toroidal,
            workers: 0,
            metrics_interval: default_metrics_interval(),
            cell: CellParams::default(),
            backend: BackendKind::Cpu,
            seed: Some(SeedConfig::default()),
        }
    }
}

/// Rule selection: a catalog preset or explicit ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleConfig {
    Preset(RulePreset),
    Custom {
        birth: NeighborRange,
        survival: NeighborRange,
    },
}

impl RuleConfig {
    /// Resolve into a concrete rule set.
    pub fn to_rule_set(&self) -> Result<RuleSet, ConfigError> {
        match self {
            RuleConfig::Preset(preset) => Ok(preset.rule()),
            RuleConfig::Custom { birth, survival } => RuleSet::custom(*birth, *survival)
                .map_err(|e| ConfigError::InvalidRule(e.to_string())),
        }
    }
}

/// Random initial fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedConfig {
    /// Probability that each cell starts alive.
    pub density: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            density: 0.2,
            seed: 42,
        }
    }
}

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Cpu,
    Gpu,
}

/// Per-engine context handed to backends at construction.
///
/// Holds what would otherwise be process-wide state: the log target
/// used for this engine's records and its tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Target attached to every log record emitted by this engine.
    pub log_target: String,
    /// Worker threads for parallel stepping.
    pub workers: usize,
    /// Steps between pushed metrics snapshots (0 disables push delivery).
    pub metrics_interval: u64,
    /// Per-cell bookkeeping.
    pub params: CellParams,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self {
            log_target: "voxel_life".to_string(),
            workers: available_workers(),
            metrics_interval: default_metrics_interval(),
            params: CellParams::default(),
        }
    }
}

impl EngineContext {
    /// Override the log target.
    pub fn with_log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }

    /// Override the worker count (0 = available parallelism).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 {
            available_workers()
        } else {
            workers
        };
        self
    }
}

fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl SimulationConfig {
    /// Get total grid size (width * height * depth).
    #[inline]
    pub fn grid_size(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Build the engine context described by this configuration.
    pub fn context(&self) -> EngineContext {
        EngineContext {
            metrics_interval: self.metrics_interval,
            params: self.cell,
            ..EngineContext::default()
        }
        .with_workers(self.workers)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        self.rule.to_rule_set()?;
        if self.cell.max_age == 0 || self.cell.max_age > MAX_CELL_AGE {
            return Err(ConfigError::InvalidMaxAge(self.cell.max_age));
        }
        if let Some(seed) = &self.seed
            && !(0.0..=1.0).contains(&seed.density)
        {
            return Err(ConfigError::InvalidDensity(seed.density));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid dimensions (width, height, depth) must be non-zero")]
    InvalidDimensions,
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
    #[error("Maximum cell age {0} must be between 1 and 32767")]
    InvalidMaxAge(u16),
    #[error("Seed density {0} must be within [0, 1]")]
    InvalidDensity(f64),
}
