//! Schema module - Configuration, rule and boundary types for Voxel Life.

mod config;
mod rules;

pub use config::*;
pub use rules::*;
