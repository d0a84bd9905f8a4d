//! Compute module - grid state, rule evaluation and stepping backends.

mod analysis;
mod backend;
mod boundary;
mod cell;
mod executor;
mod grid;
mod metrics;
mod rules;

pub mod gpu;

pub use analysis::*;
pub use backend::*;
pub use boundary::*;
pub use cell::*;
pub use executor::*;
pub use grid::*;
pub use metrics::*;
pub use rules::*;
