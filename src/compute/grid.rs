//! Double-buffered grid state.
//!
//! Cells live in two flat arrays addressed by the index law
//! `z * width * height + y * width + x`. One array is current (readable),
//! the other receives the generation being computed; a step flips the
//! role index instead of copying data.

use rand::prelude::*;

use super::{Cell, CellParams, Dimensions, Position};
use crate::error::EngineError;
use crate::schema::{BoundaryKind, RuleSet};

/// Allocate a dead buffer, reporting allocation failure instead of aborting.
fn alloc_buffer(cells: usize) -> Result<Vec<Cell>, EngineError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(cells)
        .map_err(|_| EngineError::AllocationFailure {
            cells: cells as u128,
        })?;
    buffer.resize(cells, Cell::DEAD);
    Ok(buffer)
}

/// Simulation grid.
#[derive(Debug, Clone)]
pub struct Grid {
    dims: Dimensions,
    buffers: [Vec<Cell>; 2],
    /// Which of `buffers` is current.
    current: usize,
    generation: u64,
    population: u64,
    rule: RuleSet,
    boundary: BoundaryKind,
    params: CellParams,
}

impl Grid {
    /// Allocate an all-dead grid.
    pub fn new(
        dims: Dimensions,
        rule: RuleSet,
        boundary: BoundaryKind,
        params: CellParams,
    ) -> Result<Self, EngineError> {
        rule.validate()?;
        params.validate()?;
        let cells = dims.checked_cells()?;
        let front = alloc_buffer(cells)?;
        let back = alloc_buffer(cells)?;

        Ok(Self {
            dims,
            buffers: [front, back],
            current: 0,
            generation: 0,
            population: 0,
            rule,
            boundary,
            params,
        })
    }

    /// Build a grid around an existing current buffer.
    ///
    /// The population is recounted from `cells`.
    pub fn from_cells(
        dims: Dimensions,
        cells: Vec<Cell>,
        generation: u64,
        rule: RuleSet,
        boundary: BoundaryKind,
        params: CellParams,
    ) -> Result<Self, EngineError> {
        rule.validate()?;
        params.validate()?;
        let total = dims.checked_cells()?;
        if cells.len() != total {
            return Err(EngineError::InvalidDimensions {
                width: dims.width,
                height: dims.height,
                depth: dims.depth,
            });
        }
        let back = alloc_buffer(total)?;
        let population = cells.iter().filter(|c| c.is_alive()).count() as u64;

        Ok(Self {
            dims,
            buffers: [cells, back],
            current: 0,
            generation,
            population,
            rule,
            boundary,
            params,
        })
    }

    #[inline]
    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    #[inline]
    pub fn total_cells(&self) -> usize {
        self.buffers[self.current].len()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn population(&self) -> u64 {
        self.population
    }

    pub fn rule(&self) -> &RuleSet {
        &self.rule
    }

    /// Replace the rule set; takes effect on the next step.
    pub fn set_rule(&mut self, rule: RuleSet) -> Result<(), EngineError> {
        rule.validate()?;
        self.rule = rule;
        Ok(())
    }

    pub fn boundary(&self) -> BoundaryKind {
        self.boundary
    }

    pub fn set_boundary(&mut self, boundary: BoundaryKind) {
        self.boundary = boundary;
    }

    pub fn params(&self) -> &CellParams {
        &self.params
    }

    /// Read-only view of the current generation.
    #[inline]
    pub fn current(&self) -> &[Cell] {
        &self.buffers[self.current]
    }

    /// Alive state at `(x, y, z)`.
    pub fn get_cell(&self, x: u32, y: u32, z: u32) -> Result<bool, EngineError> {
        Ok(self.cell(x, y, z)?.is_alive())
    }

    /// Full cell record at `(x, y, z)`.
    pub fn cell(&self, x: u32, y: u32, z: u32) -> Result<Cell, EngineError> {
        let idx = self.dims.checked_index(x, y, z)?;
        Ok(self.buffers[self.current][idx])
    }

    /// Set a cell alive (fresh age and energy) or dead.
    pub fn set_cell(&mut self, x: u32, y: u32, z: u32, alive: bool) -> Result<(), EngineError> {
        let idx = self.dims.checked_index(x, y, z)?;
        let slot = &mut self.buffers[self.current][idx];
        let was_alive = slot.is_alive();
        *slot = if alive {
            Cell::spawned(&self.params)
        } else {
            Cell::DEAD
        };
        match (was_alive, alive) {
            (false, true) => self.population += 1,
            (true, false) => self.population -= 1,
            _ => {}
        }
        Ok(())
    }

    /// Kill every cell. The generation counter is kept.
    pub fn clear(&mut self) {
        self.buffers[self.current].fill(Cell::DEAD);
        self.population = 0;
    }

    /// Fill the grid so each cell is alive with probability `density`.
    ///
    /// Cells are visited in index order from a `StdRng` seeded with
    /// `seed`, so the result depends only on `(dims, density, seed)`.
    pub fn randomize(&mut self, density: f64, seed: u64) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&density) {
            return Err(EngineError::InvalidDensity(density));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let spawned = Cell::spawned(&self.params);
        let mut population = 0u64;
        for cell in self.buffers[self.current].iter_mut() {
            let alive = rng.gen_bool(density);
            *cell = if alive { spawned } else { Cell::DEAD };
            population += alive as u64;
        }
        self.population = population;
        Ok(())
    }

    /// Change extents, keeping the overlapping sub-volume.
    ///
    /// New space is dead. Existing buffers are reused when their capacity
    /// suffices, so shrinking keeps the larger reservation. Any growth is
    /// reserved before anything is replaced, so on failure the grid is
    /// untouched.
    pub fn resize(&mut self, width: u32, height: u32, depth: u32) -> Result<(), EngineError> {
        let new_dims = Dimensions::new(width, height, depth);
        let cells = new_dims.checked_cells()?;
        for buffer in self.buffers.iter_mut() {
            if buffer.capacity() < cells {
                buffer
                    .try_reserve_exact(cells - buffer.len())
                    .map_err(|_| EngineError::AllocationFailure {
                        cells: cells as u128,
                    })?;
            }
        }

        let old_dims = self.dims;
        let spare = self.current ^ 1;
        let (first, second) = self.buffers.split_at_mut(1);
        let (front, old) = if spare == 0 {
            (&mut first[0], &second[0])
        } else {
            (&mut second[0], &first[0])
        };
        front.clear();
        front.resize(cells, Cell::DEAD);

        let copy_w = old_dims.width.min(width) as usize;
        let mut population = 0u64;
        for z in 0..old_dims.depth.min(depth) {
            for y in 0..old_dims.height.min(height) {
                let src = old_dims.index(0, y, z);
                let dst = new_dims.index(0, y, z);
                let row = &old[src..src + copy_w];
                front[dst..dst + copy_w].copy_from_slice(row);
                population += row.iter().filter(|c| c.is_alive()).count() as u64;
            }
        }

        let back = &mut self.buffers[self.current];
        back.clear();
        back.resize(cells, Cell::DEAD);

        self.dims = new_dims;
        self.current = spare;
        self.population = population;
        Ok(())
    }

    /// Cells of the current generation with their positions, in index order.
    pub fn cells(&self) -> impl ExactSizeIterator<Item = (Position, Cell)> + '_ {
        let dims = self.dims;
        self.current()
            .iter()
            .enumerate()
            .map(move |(i, &c)| (dims.position(i), c))
    }

    /// Read-only frame for renderers.
    pub fn frame(&self) -> FrameView<'_> {
        FrameView {
            cells: self.current(),
            dims: self.dims,
            generation: self.generation,
            population: self.population,
        }
    }

    /// Bytes occupied by the cells of both buffers.
    pub fn used_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.len()).sum::<usize>() * std::mem::size_of::<Cell>()
    }

    /// Bytes reserved by both buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.capacity()).sum::<usize>() * std::mem::size_of::<Cell>()
    }

    /// Split into the read-only current buffer and the writable next buffer.
    pub(crate) fn step_buffers(&mut self) -> (&[Cell], &mut [Cell]) {
        let (first, second) = self.buffers.split_at_mut(1);
        if self.current == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        }
    }

    /// Promote the next buffer to current after a completed step.
    pub(crate) fn commit_step(&mut self, population: u64) {
        self.current ^= 1;
        self.generation += 1;
        self.population = population;
    }
}

/// Current generation as seen by a renderer.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub cells: &'a [Cell],
    pub dims: Dimensions,
    pub generation: u64,
    pub population: u64,
}

impl<'a> FrameView<'a> {
    /// Positions and cells in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Position, Cell)> + 'a {
        let dims = self.dims;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, &c)| (dims.position(i), c))
    }

    /// Positions of live cells only.
    pub fn alive(&self) -> impl Iterator<Item = Position> + 'a {
        self.iter()
            .filter(|(_, c)| c.is_alive())
            .map(|(p, _)| p)
    }
}
