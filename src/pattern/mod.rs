//! Pattern persistence for voxel grids.
//!
//! Snapshots of a grid's alive cells are stored as `.3dlife` files, and a
//! small library of built-in patterns can be stamped into any grid.
//!
//! # File Format
//!
//! All integers are little-endian.
//!
//! ```text
//! Header (440 bytes):
//!   Magic: "V3DL" (4 bytes)
//!   Version: u32 (= 1)
//!   Width, Height, Depth: u32
//!   Rule set id: u32 (preset 0-7, or u32::MAX for custom)
//!   Boundary kind: u32 (0 toroidal, 1 fixed, 2 infinite, 3 mirror)
//!   Name length, Description length: u32
//!   Data size: u32 (payload bytes)
//!   Name: 64 bytes, NUL padded UTF-8
//!   Description: 256 bytes
//!   Author: 64 bytes
//!   Version string: 16 bytes
//!
//! Payload preamble (40 bytes):
//!   Encoding: u8 (0 raw, 1 run-length, 2 lz4)
//!   Birth min/max, Survival min/max: u8
//!   Reserved: 3 bytes
//!   Population, Generation: u64
//!   Created, Modified: u64 (unix seconds)
//!
//! Cell stream (variable):
//!   Raw: alive bits, LSB first, ceil(cells / 8) bytes
//!   Run-length: u32 runs alternating dead/alive, starting with dead
//!   LZ4: the raw bits, size-prepended
//! ```

mod codec;
mod format;
mod library;

pub use codec::{Compression, Pattern, PatternMetadata, load, save};
pub use format::{
    AUTHOR_CAPACITY, DESCRIPTION_CAPACITY, Encoding, NAME_CAPACITY, PATTERN_EXTENSION,
    PATTERN_MAGIC, PATTERN_VERSION, PatternError, PatternHeader, PayloadPreamble,
    VERSION_CAPACITY,
};
pub use library::{
    builtin, builtin_patterns, load_directory, load_from_file, save_to_file, stamp,
};
