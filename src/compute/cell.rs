//! Packed cell record and grid addressing.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

const ALIVE_MASK: u32 = 0x1;
const AGE_SHIFT: u32 = 1;
const AGE_MASK: u32 = 0x7FFF;
const ENERGY_SHIFT: u32 = 16;
const ENERGY_MASK: u32 = 0xFF;
const NEIGHBORS_SHIFT: u32 = 24;
const NEIGHBORS_MASK: u32 = 0xFF;

/// Largest age representable in the packed layout.
pub const MAX_CELL_AGE: u16 = AGE_MASK as u16;

/// A single voxel, packed into 32 bits.
///
/// Layout (LSB first): `alive:1 | age:15 | energy:8 | neighbors:8`.
/// The GPU shader reads and writes the same layout, so both backends
/// exchange buffers without conversion.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Cell(u32);

impl Cell {
    /// The dead, zeroed cell.
    pub const DEAD: Cell = Cell(0);

    /// Build a cell from its fields. Age is truncated to 15 bits.
    #[inline]
    pub fn new(alive: bool, age: u16, energy: u8, neighbors: u8) -> Self {
        Cell(
            (alive as u32)
                | ((age as u32 & AGE_MASK) << AGE_SHIFT)
                | ((energy as u32) << ENERGY_SHIFT)
                | ((neighbors as u32) << NEIGHBORS_SHIFT),
        )
    }

    /// A freshly placed live cell.
    #[inline]
    pub fn spawned(params: &CellParams) -> Self {
        Cell::new(true, 1, params.birth_energy, 0)
    }

    #[inline]
    pub fn is_alive(self) -> bool {
        self.0 & ALIVE_MASK != 0
    }

    #[inline]
    pub fn age(self) -> u16 {
        ((self.0 >> AGE_SHIFT) & AGE_MASK) as u16
    }

    #[inline]
    pub fn energy(self) -> u8 {
        ((self.0 >> ENERGY_SHIFT) & ENERGY_MASK) as u8
    }

    /// Alive neighbors counted when this cell was last evolved.
    #[inline]
    pub fn neighbors(self) -> u8 {
        ((self.0 >> NEIGHBORS_SHIFT) & NEIGHBORS_MASK) as u8
    }

    /// Raw packed representation.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Cell(bits)
    }
}

/// Per-cell bookkeeping parameters applied on every generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellParams {
    /// Age at which a surviving cell stops aging.
    pub max_age: u16,
    /// Energy lost per generation by a surviving cell (floored at 1).
    pub energy_decay: u8,
    /// Energy given to a newly born or placed cell.
    pub birth_energy: u8,
}

impl CellParams {
    /// Reject ages the packed layout cannot hold.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_age == 0 || self.max_age > MAX_CELL_AGE {
            return Err(EngineError::InvalidMaxAge(self.max_age));
        }
        Ok(())
    }
}

impl Default for CellParams {
    fn default() -> Self {
        Self {
            max_age: 1000,
            energy_decay: 1,
            birth_energy: 100,
        }
    }
}

/// Integer voxel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Position {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Grid extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Validated cell count.
    ///
    /// Fails with `InvalidDimensions` on any zero extent and with
    /// `AllocationFailure` when the count does not fit in memory indices.
    pub fn checked_cells(&self) -> Result<usize, EngineError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(EngineError::InvalidDimensions {
                width: self.width,
                height: self.height,
                depth: self.depth,
            });
        }
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|n| n.checked_mul(self.depth as usize))
            .filter(|&n| n <= isize::MAX as usize / std::mem::size_of::<Cell>())
            .ok_or(EngineError::AllocationFailure {
                cells: self.width as u128 * self.height as u128 * self.depth as u128,
            })
    }

    /// Cell count, assuming the extents were validated.
    #[inline]
    pub fn total_cells(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32, z: u32) -> bool {
        x < self.width && y < self.height && z < self.depth
    }

    /// Flat index: `z * width * height + y * width + x`.
    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        z as usize * self.width as usize * self.height as usize
            + y as usize * self.width as usize
            + x as usize
    }

    /// Inverse of [`Dimensions::index`].
    #[inline]
    pub fn position(&self, index: usize) -> Position {
        let plane = self.width as usize * self.height as usize;
        let z = index / plane;
        let rem = index % plane;
        Position {
            x: (rem % self.width as usize) as u32,
            y: (rem / self.width as usize) as u32,
            z: z as u32,
        }
    }

    /// Bounds-checked index.
    pub fn checked_index(&self, x: u32, y: u32, z: u32) -> Result<usize, EngineError> {
        if self.contains(x, y, z) {
            Ok(self.index(x, y, z))
        } else {
            Err(EngineError::OutOfRange { x, y, z })
        }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_params_max_age_bounds() {
        assert!(CellParams::default().validate().is_ok());
        for max_age in [1, MAX_CELL_AGE] {
            let params = CellParams {
                max_age,
                ..CellParams::default()
            };
            assert!(params.validate().is_ok());
        }
        for max_age in [0, MAX_CELL_AGE + 1, 40000] {
            let params = CellParams {
                max_age,
                ..CellParams::default()
            };
            assert!(matches!(
                params.validate(),
                Err(EngineError::InvalidMaxAge(a)) if a == max_age
            ));
        }
    }

    #[test]
    fn test_cell_packing() {
        let cell = Cell::new(true, 1234, 77, 26);
        assert!(cell.is_alive());
        assert_eq!(cell.age(), 1234);
        assert_eq!(cell.energy(), 77);
        assert_eq!(cell.neighbors(), 26);

        let dead = Cell::new(false, 0, 0, 5);
        assert!(!dead.is_alive());
        assert_eq!(dead.neighbors(), 5);
        assert_eq!(Cell::DEAD.bits(), 0);
    }

    #[test]
    fn test_age_truncated_to_fifteen_bits() {
        let cell = Cell::new(true, u16::MAX, 0, 0);
        assert_eq!(cell.age(), MAX_CELL_AGE);
        assert!(cell.is_alive());
        assert_eq!(cell.energy(), 0);
    }

    #[test]
    fn test_index_law() {
        let dims = Dimensions::new(4, 3, 2);
        assert_eq!(dims.index(0, 0, 0), 0);
        assert_eq!(dims.index(1, 0, 0), 1);
        assert_eq!(dims.index(0, 1, 0), 4);
        assert_eq!(dims.index(0, 0, 1), 12);
        assert_eq!(dims.index(3, 2, 1), 23);

        for i in 0..dims.total_cells() {
            let p = dims.position(i);
            assert_eq!(dims.index(p.x, p.y, p.z), i);
        }
    }

    #[test]
    fn test_checked_cells() {
        assert_eq!(Dimensions::new(2, 3, 4).checked_cells().unwrap(), 24);
        assert!(matches!(
            Dimensions::new(0, 3, 4).checked_cells(),
            Err(EngineError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            Dimensions::new(u32::MAX, u32::MAX, u32::MAX).checked_cells(),
            Err(EngineError::AllocationFailure { .. })
        ));
    }

    #[test]
    fn test_checked_index_out_of_range() {
        let dims = Dimensions::new(2, 2, 2);
        assert!(dims.checked_index(1, 1, 1).is_ok());
        assert!(matches!(
            dims.checked_index(2, 0, 0),
            Err(EngineError::OutOfRange { x: 2, y: 0, z: 0 })
        ));
    }
}
