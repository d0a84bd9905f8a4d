//! Boundary resolution and 26-neighbor counting.

use super::{Cell, Dimensions, Position};
use crate::schema::BoundaryKind;

/// The 26 Moore-neighborhood offsets, z-major like the index law.
pub const NEIGHBOR_OFFSETS: [(i32, i32, i32); 26] = {
    let mut offsets = [(0, 0, 0); 26];
    let mut n = 0;
    let mut dz = -1;
    while dz <= 1 {
        let mut dy = -1;
        while dy <= 1 {
            let mut dx = -1;
            while dx <= 1 {
                if !(dx == 0 && dy == 0 && dz == 0) {
                    offsets[n] = (dx, dy, dz);
                    n += 1;
                }
                dx += 1;
            }
            dy += 1;
        }
        dz += 1;
    }
    offsets
};

/// Resolve one axis coordinate `coord` against extent `bound`.
#[inline]
fn resolve_axis(kind: BoundaryKind, coord: i64, bound: u32) -> Option<u32> {
    let bound = bound as i64;
    if (0..bound).contains(&coord) {
        return Some(coord as u32);
    }
    match kind {
        BoundaryKind::Toroidal => Some(coord.rem_euclid(bound) as u32),
        BoundaryKind::Fixed | BoundaryKind::Infinite => None,
        BoundaryKind::Mirror => {
            let reflected = if coord < 0 {
                -coord
            } else {
                2 * bound - 1 - coord
            };
            Some(reflected.clamp(0, bound - 1) as u32)
        }
    }
}

/// Resolve `base + offset` under `kind`.
///
/// Returns `None` when the sample lies outside a grid with dead
/// surroundings (`Fixed`/`Infinite`).
#[inline]
pub fn resolve(
    kind: BoundaryKind,
    base: Position,
    offset: (i32, i32, i32),
    dims: Dimensions,
) -> Option<Position> {
    Some(Position {
        x: resolve_axis(kind, base.x as i64 + offset.0 as i64, dims.width)?,
        y: resolve_axis(kind, base.y as i64 + offset.1 as i64, dims.height)?,
        z: resolve_axis(kind, base.z as i64 + offset.2 as i64, dims.depth)?,
    })
}

/// Count live neighbors of `pos` in `cells`.
#[inline]
pub fn count_neighbors(cells: &[Cell], dims: Dimensions, kind: BoundaryKind, pos: Position) -> u8 {
    let interior = pos.x > 0
        && pos.y > 0
        && pos.z > 0
        && pos.x + 1 < dims.width
        && pos.y + 1 < dims.height
        && pos.z + 1 < dims.depth;

    let mut count = 0u8;
    if interior {
        // No offset can leave the grid, so skip resolution entirely.
        let row = dims.width as isize;
        let plane = row * dims.height as isize;
        let center = dims.index(pos.x, pos.y, pos.z) as isize;
        for &(dx, dy, dz) in &NEIGHBOR_OFFSETS {
            let idx = center + dz as isize * plane + dy as isize * row + dx as isize;
            count += cells[idx as usize].is_alive() as u8;
        }
    } else {
        for &offset in &NEIGHBOR_OFFSETS {
            if let Some(p) = resolve(kind, pos, offset, dims) {
                count += cells[dims.index(p.x, p.y, p.z)].is_alive() as u8;
            }
        }
    }
    count
}
