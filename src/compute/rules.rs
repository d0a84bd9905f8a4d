//! Rule evaluation - pure per-cell transition functions.

use super::{Cell, CellParams};
use crate::schema::RuleSet;

/// Next alive state for a cell with `neighbors` live neighbors.
///
/// Live cells consult the survival range, dead cells the birth range.
#[inline]
pub fn next_state(alive: bool, neighbors: u8, rule: &RuleSet) -> bool {
    if alive {
        rule.survival.contains(neighbors)
    } else {
        rule.birth.contains(neighbors)
    }
}

/// Full cell transition including age and energy bookkeeping.
#[inline]
pub fn evolve_cell(cell: Cell, neighbors: u8, rule: &RuleSet, params: &CellParams) -> Cell {
    let was_alive = cell.is_alive();
    if !next_state(was_alive, neighbors, rule) {
        return Cell::new(false, 0, 0, neighbors);
    }
    if was_alive {
        let age = cell.age().saturating_add(1).min(params.max_age);
        let energy = cell.energy().saturating_sub(params.energy_decay).max(1);
        Cell::new(true, age, energy, neighbors)
    } else {
        Cell::new(true, 1, params.birth_energy, neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NeighborRange, RulePreset};

    #[test]
    fn test_ranges_are_inclusive() {
        let rule = RulePreset::R5766.rule();
        assert!(!next_state(false, 4, &rule));
        assert!(next_state(false, 5, &rule));
        assert!(next_state(false, 7, &rule));
        assert!(!next_state(false, 8, &rule));

        assert!(!next_state(true, 5, &rule));
        assert!(next_state(true, 6, &rule));
        assert!(!next_state(true, 7, &rule));
    }

    #[test]
    fn test_next_state_exhaustive_against_ranges() {
        let rule = RuleSet::custom(NeighborRange::new(0, 26), NeighborRange::new(13, 13)).unwrap();
        for n in 0..=26u8 {
            assert!(next_state(false, n, &rule));
            assert_eq!(next_state(true, n, &rule), n == 13);
        }
    }

    #[test]
    fn test_next_state_is_pure_across_threads() {
        let rule = RulePreset::R4556.rule();
        let expected: Vec<bool> = (0..=26u8)
            .flat_map(|n| [next_state(false, n, &rule), next_state(true, n, &rule)])
            .collect();

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (0..=26u8)
                            .flat_map(|n| [next_state(false, n, &rule), next_state(true, n, &rule)])
                            .collect::<Vec<bool>>()
                    })
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }

    #[test]
    fn test_evolve_bookkeeping() {
        let rule = RulePreset::R2333.rule();
        let params = CellParams {
            max_age: 3,
            energy_decay: 10,
            birth_energy: 15,
        };

        let born = evolve_cell(Cell::DEAD, 2, &rule, &params);
        assert!(born.is_alive());
        assert_eq!(born.age(), 1);
        assert_eq!(born.energy(), 15);
        assert_eq!(born.neighbors(), 2);

        let older = evolve_cell(born, 3, &rule, &params);
        assert_eq!(older.age(), 2);
        assert_eq!(older.energy(), 5);

        let oldest = evolve_cell(evolve_cell(older, 3, &rule, &params), 3, &rule, &params);
        assert_eq!(oldest.age(), 3);
        assert_eq!(oldest.energy(), 1);

        let died = evolve_cell(oldest, 4, &rule, &params);
        assert_eq!(died, Cell::new(false, 0, 0, 4));
    }
}
