//! Voxel Life - deterministic, parallel 3D cellular automata.
//!
//! This crate implements Conway-style life on a voxel grid: every cell looks
//! at its 26 Moore neighbors and is born or survives according to a pair of
//! neighbor-count ranges. Grids are double buffered, stepping is spread over
//! a persistent rayon pool (or a wgpu compute shader), and snapshots can be
//! saved to and loaded from the `.3dlife` pattern format.
//!
//! # Architecture
//!
//! The crate is split into three main modules:
//!
//! - `schema`: Rule sets, boundary kinds and JSON configuration
//! - `compute`: Grid state, rule evaluation, step executors, backends, metrics
//! - `pattern`: `.3dlife` encoding and the built-in pattern library
//!
//! # Example
//!
//! ```rust,no_run
//! use voxel_life::{
//!     compute::{Backend, Dimensions, SimulationBackend},
//!     schema::{BackendKind, BoundaryKind, EngineContext, RulePreset},
//! };
//!
//! let mut backend = Backend::new(BackendKind::Cpu, EngineContext::default())?;
//! backend.set_rule_set(RulePreset::R5766.rule())?;
//! backend.set_boundary_kind(BoundaryKind::Toroidal);
//! backend.initialize(Dimensions::new(32, 32, 32))?;
//! backend.randomize(0.2, 42)?;
//!
//! for _ in 0..100 {
//!     backend.step()?;
//! }
//!
//! let grid = backend.grid().expect("initialized");
//! println!("Generation {}: {} alive", grid.generation(), grid.population());
//! # Ok::<(), voxel_life::EngineError>(())
//! ```

pub mod compute;
pub mod error;
pub mod pattern;
pub mod schema;

// Re-export commonly used types
pub use compute::{Backend, CpuBackend, Grid, Simulation, SimulationBackend};
pub use error::EngineError;
pub use pattern::{Pattern, PatternMetadata};
pub use schema::{BoundaryKind, RuleSet, SimulationConfig};
