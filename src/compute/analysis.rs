//! Rule analysis.
//!
//! Runs a copy of a grid forward, records its population, and classifies
//! what the pattern settles into: extinction, a still life, an oscillator,
//! a spaceship, or unbounded growth or decay.

use serde::{Deserialize, Serialize};

use super::{CellParams, Dimensions, Grid, Position, StepExecutor};
use crate::error::EngineError;
use crate::schema::{BoundaryKind, RuleSet};

/// Generations run by [`RuleAnalyzer::analyze`] unless overridden.
pub const DEFAULT_ANALYSIS_GENERATIONS: u32 = 100;

/// Longest period checked for oscillators and spaceships.
pub const MAX_OSCILLATOR_PERIOD: u32 = 20;

/// Average relative population change per generation separating growth
/// and decay from irregular behavior.
const GROWTH_THRESHOLD: f64 = 0.01;

/// Long-run behavior of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Behavior {
    /// No live cells remain.
    Extinct,
    /// Unchanged by a step.
    StillLife,
    /// Returns to the same cells after `period` steps.
    Oscillator { period: u32 },
    /// Returns to the same shape shifted by `offset` after `period` steps.
    Spaceship { period: u32, offset: [i64; 3] },
    Growing,
    Dying,
    /// None of the above within the checked period.
    Chaotic,
}

/// Outcome of [`RuleAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAnalysis {
    pub rule_name: String,
    /// Population at generation 0 and after every step.
    pub population_history: Vec<u64>,
    /// 1 for a constant population, lower as its variance approaches
    /// the cell count.
    pub stability: f64,
    /// See [`growth_rate`].
    pub growth_rate: f64,
    /// See [`complexity`].
    pub complexity: f64,
    /// Classification of the final generation.
    pub behavior: Behavior,
}

/// Live cells of one generation, in index order, plus their bounding-box
/// corner.
struct Snapshot {
    cells: Vec<Position>,
    origin: Position,
}

impl Snapshot {
    fn capture(grid: &Grid) -> Self {
        let cells: Vec<Position> = grid.frame().alive().collect();
        let origin = cells.iter().fold(
            Position::new(u32::MAX, u32::MAX, u32::MAX),
            |m, p| Position::new(m.x.min(p.x), m.y.min(p.y), m.z.min(p.z)),
        );
        Self { cells, origin }
    }

    /// Same cells relative to the origin. Index order survives translation.
    fn same_shape(&self, other: &Snapshot) -> bool {
        self.cells.len() == other.cells.len()
            && self.cells.iter().zip(&other.cells).all(|(a, b)| {
                a.x - self.origin.x == b.x - other.origin.x
                    && a.y - self.origin.y == b.y - other.origin.y
                    && a.z - self.origin.z == b.z - other.origin.z
            })
    }

    fn offset_to(&self, other: &Snapshot) -> [i64; 3] {
        [
            other.origin.x as i64 - self.origin.x as i64,
            other.origin.y as i64 - self.origin.y as i64,
            other.origin.z as i64 - self.origin.z as i64,
        ]
    }
}

/// Runs patterns forward on a borrowed executor and measures them.
///
/// The grid passed in is never modified; every measurement works on a
/// clone.
#[derive(Debug)]
pub struct RuleAnalyzer<'a> {
    executor: &'a StepExecutor,
    generations: u32,
    max_period: u32,
}

impl<'a> RuleAnalyzer<'a> {
    pub fn new(executor: &'a StepExecutor) -> Self {
        Self {
            executor,
            generations: DEFAULT_ANALYSIS_GENERATIONS,
            max_period: MAX_OSCILLATOR_PERIOD,
        }
    }

    pub fn with_generations(mut self, generations: u32) -> Self {
        self.generations = generations;
        self
    }

    pub fn with_max_period(mut self, max_period: u32) -> Self {
        self.max_period = max_period.max(1);
        self
    }

    /// Seed a random soup under `rule` and analyze it.
    pub fn analyze_rule(
        &self,
        rule: RuleSet,
        dims: Dimensions,
        boundary: BoundaryKind,
        density: f64,
        seed: u64,
    ) -> Result<RuleAnalysis, EngineError> {
        let mut grid = Grid::new(dims, rule, boundary, CellParams::default())?;
        grid.randomize(density, seed)?;
        self.analyze(&grid)
    }

    /// Run `grid` for the configured number of generations and classify
    /// where it ends up.
    pub fn analyze(&self, grid: &Grid) -> Result<RuleAnalysis, EngineError> {
        let mut sim = grid.clone();
        let mut history = Vec::with_capacity(self.generations as usize + 1);
        history.push(sim.population());
        for _ in 0..self.generations {
            history.push(self.executor.step(&mut sim)?.alive);
        }

        let growth = growth_rate(&history);
        let behavior = match self.periodic_behavior(&sim)? {
            Some(behavior) => behavior,
            None if growth > GROWTH_THRESHOLD => Behavior::Growing,
            None if growth < -GROWTH_THRESHOLD => Behavior::Dying,
            None => Behavior::Chaotic,
        };

        let analysis = RuleAnalysis {
            rule_name: grid.rule().name.clone(),
            stability: stability(&history, grid.total_cells()),
            growth_rate: growth,
            complexity: complexity(&sim),
            behavior,
            population_history: history,
        };
        log::debug!(
            "Analyzed rule {} over {} generations: {:?}",
            analysis.rule_name,
            self.generations,
            analysis.behavior
        );
        Ok(analysis)
    }

    /// Population at generation 0 and after each of `generations` steps.
    pub fn population_history(
        &self,
        grid: &Grid,
        generations: u32,
    ) -> Result<Vec<u64>, EngineError> {
        let mut sim = grid.clone();
        let mut history = vec![sim.population()];
        for _ in 0..generations {
            history.push(self.executor.step(&mut sim)?.alive);
        }
        Ok(history)
    }

    /// Whether one step leaves a non-empty `grid` unchanged.
    pub fn is_still_life(&self, grid: &Grid) -> Result<bool, EngineError> {
        Ok(self.periodic_behavior(grid)? == Some(Behavior::StillLife))
    }

    /// Smallest period above 1 after which `grid` repeats exactly.
    pub fn oscillator_period(&self, grid: &Grid) -> Result<Option<u32>, EngineError> {
        Ok(match self.periodic_behavior(grid)? {
            Some(Behavior::Oscillator { period }) => Some(period),
            _ => None,
        })
    }

    /// Period and displacement if `grid` repeats its shape elsewhere.
    pub fn spaceship(&self, grid: &Grid) -> Result<Option<(u32, [i64; 3])>, EngineError> {
        Ok(match self.periodic_behavior(grid)? {
            Some(Behavior::Spaceship { period, offset }) => Some((period, offset)),
            _ => None,
        })
    }

    /// Step a clone up to `max_period` times looking for a repeat of the
    /// starting cells, or of their shape at another position.
    fn periodic_behavior(&self, grid: &Grid) -> Result<Option<Behavior>, EngineError> {
        if grid.population() == 0 {
            return Ok(Some(Behavior::Extinct));
        }
        let start = Snapshot::capture(grid);
        let mut sim = grid.clone();
        for period in 1..=self.max_period {
            if self.executor.step(&mut sim)?.alive == 0 {
                return Ok(None);
            }
            let now = Snapshot::capture(&sim);
            if now.cells == start.cells {
                return Ok(Some(if period == 1 {
                    Behavior::StillLife
                } else {
                    Behavior::Oscillator { period }
                }));
            }
            if now.same_shape(&start) {
                return Ok(Some(Behavior::Spaceship {
                    period,
                    offset: start.offset_to(&now),
                }));
            }
        }
        Ok(None)
    }
}

/// One minus the population variance over the cell count, floored at 0.
pub fn stability(history: &[u64], total_cells: usize) -> f64 {
    if history.is_empty() || total_cells == 0 {
        return 1.0;
    }
    let n = history.len() as f64;
    let mean = history.iter().map(|&p| p as f64).sum::<f64>() / n;
    let variance = history
        .iter()
        .map(|&p| (p as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    1.0 - (variance / total_cells as f64).min(1.0)
}

/// Average relative population change per generation, from the first
/// to the last entry of `history`. Zero when it starts empty.
pub fn growth_rate(history: &[u64]) -> f64 {
    match (history.first(), history.last()) {
        (Some(&first), Some(&last)) if history.len() > 1 && first > 0 => {
            (last as f64 - first as f64) / (first as f64 * (history.len() - 1) as f64)
        }
        _ => 0.0,
    }
}

/// Shannon entropy of the 2x2x2 block patterns of the current generation,
/// scaled to `[0, 1]` by the 8 bits a block can carry.
///
/// Blocks do not wrap; grids thinner than 2 cells on any axis score 0.
pub fn complexity(grid: &Grid) -> f64 {
    let dims = grid.dimensions();
    if dims.width < 2 || dims.height < 2 || dims.depth < 2 {
        return 0.0;
    }
    let cells = grid.current();
    let mut counts = [0u64; 256];
    let mut total = 0u64;
    for z in 0..dims.depth - 1 {
        for y in 0..dims.height - 1 {
            for x in 0..dims.width - 1 {
                let mut block = 0usize;
                for bit in 0..8u32 {
                    let idx = dims.index(x + (bit & 1), y + ((bit >> 1) & 1), z + (bit >> 2));
                    if cells[idx].is_alive() {
                        block |= 1 << bit;
                    }
                }
                counts[block] += 1;
                total += 1;
            }
        }
    }

    let total = total as f64;
    let entropy: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    entropy / 8.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NeighborRange, RulePreset};

    fn grid_with(dims: (u32, u32, u32), rule: RuleSet, cells: &[(u32, u32, u32)]) -> Grid {
        let mut grid = Grid::new(
            Dimensions::new(dims.0, dims.1, dims.2),
            rule,
            BoundaryKind::Toroidal,
            CellParams::default(),
        )
        .unwrap();
        for &(x, y, z) in cells {
            grid.set_cell(x, y, z, true).unwrap();
        }
        grid
    }

    fn block() -> Grid {
        let mut cells = Vec::new();
        for z in 3..5 {
            for y in 3..5 {
                for x in 3..5 {
                    cells.push((x, y, z));
                }
            }
        }
        // Each block cell sees 7 neighbors; outside cells see at most 4.
        grid_with((8, 8, 8), RulePreset::R6777.rule(), &cells)
    }

    #[test]
    fn test_block_is_still_life() {
        let executor = StepExecutor::new(2).unwrap();
        let analyzer = RuleAnalyzer::new(&executor).with_generations(10);
        let grid = block();

        assert!(analyzer.is_still_life(&grid).unwrap());
        let analysis = analyzer.analyze(&grid).unwrap();
        assert_eq!(analysis.behavior, Behavior::StillLife);
        assert_eq!(analysis.rule_name, "6777");
        assert_eq!(analysis.population_history, vec![8; 11]);
        assert_eq!(analysis.stability, 1.0);
        assert_eq!(analysis.growth_rate, 0.0);
        assert!(analysis.complexity > 0.0 && analysis.complexity < 1.0);

        // The input grid is left alone.
        assert_eq!(grid.generation(), 0);
    }

    #[test]
    fn test_oscillator_period_detected() {
        let executor = StepExecutor::new(2).unwrap();
        let analyzer = RuleAnalyzer::new(&executor).with_generations(11);
        let grid = grid_with(
            (8, 8, 8),
            RulePreset::R4555.rule(),
            &[(4, 3, 5), (5, 3, 5), (5, 4, 4), (5, 4, 5)],
        );

        assert_eq!(analyzer.oscillator_period(&grid).unwrap(), Some(2));
        assert!(!analyzer.is_still_life(&grid).unwrap());
        assert_eq!(analyzer.spaceship(&grid).unwrap(), None);

        let analysis = analyzer.analyze(&grid).unwrap();
        assert_eq!(analysis.behavior, Behavior::Oscillator { period: 2 });
        assert_eq!(analysis.population_history, vec![4; 12]);
        assert_eq!(analysis.stability, 1.0);
    }

    #[test]
    fn test_oscillator_beyond_max_period_is_not_reported() {
        let executor = StepExecutor::new(1).unwrap();
        let analyzer = RuleAnalyzer::new(&executor).with_max_period(1);
        let grid = grid_with(
            (8, 8, 8),
            RulePreset::R4555.rule(),
            &[(4, 3, 5), (5, 3, 5), (5, 4, 4), (5, 4, 5)],
        );
        assert_eq!(analyzer.oscillator_period(&grid).unwrap(), None);
    }

    #[test]
    fn test_spaceship_detected() {
        let rule = RuleSet::custom(NeighborRange::new(3, 3), NeighborRange::new(5, 7)).unwrap();
        let grid = grid_with(
            (16, 16, 16),
            rule,
            &[(7, 8, 11), (8, 8, 11), (9, 7, 11), (9, 7, 12)],
        );
        let executor = StepExecutor::new(2).unwrap();
        let analyzer = RuleAnalyzer::new(&executor).with_generations(6);

        assert_eq!(analyzer.spaceship(&grid).unwrap(), Some((3, [1, 1, -1])));
        let analysis = analyzer.analyze(&grid).unwrap();
        assert_eq!(
            analysis.behavior,
            Behavior::Spaceship {
                period: 3,
                offset: [1, 1, -1]
            }
        );
        assert_eq!(analysis.population_history, vec![4; 7]);
    }

    #[test]
    fn test_growth_rate() {
        assert_eq!(growth_rate(&[10, 20]), 1.0);
        assert_eq!(growth_rate(&[100, 50, 25]), -0.375);
        assert_eq!(growth_rate(&[0, 5, 9]), 0.0);
        assert_eq!(growth_rate(&[7]), 0.0);
        assert_eq!(growth_rate(&[]), 0.0);

        let executor = StepExecutor::new(2).unwrap();
        let analyzer = RuleAnalyzer::new(&executor).with_generations(3);
        let grid = grid_with((16, 16, 16), RulePreset::R2333.rule(), &[(7, 7, 7), (8, 7, 7)]);
        assert_eq!(
            analyzer.population_history(&grid, 3).unwrap(),
            vec![2, 16, 40, 104]
        );
        let analysis = analyzer.analyze(&grid).unwrap();
        assert_eq!(analysis.growth_rate, 17.0);
        assert_eq!(analysis.behavior, Behavior::Growing);
        assert!(analysis.stability < 1.0);
    }

    #[test]
    fn test_lone_cell_goes_extinct() {
        let executor = StepExecutor::new(1).unwrap();
        let analyzer = RuleAnalyzer::new(&executor).with_generations(4);
        let grid = grid_with((8, 8, 8), RulePreset::R5766.rule(), &[(5, 5, 5)]);
        let analysis = analyzer.analyze(&grid).unwrap();
        assert_eq!(analysis.population_history, vec![1, 0, 0, 0, 0]);
        assert_eq!(analysis.behavior, Behavior::Extinct);
        assert_eq!(analysis.growth_rate, -0.25);
    }

    #[test]
    fn test_stability_scales_with_variance() {
        assert_eq!(stability(&[5, 5, 5], 64), 1.0);
        // Variance 4 over 64 cells.
        assert_eq!(stability(&[2, 6], 64), 1.0 - 4.0 / 64.0);
        assert_eq!(stability(&[0, 100], 64), 0.0);
        assert_eq!(stability(&[], 64), 1.0);
    }

    #[test]
    fn test_complexity_bounds() {
        let empty = grid_with((6, 6, 6), RuleSet::default(), &[]);
        assert_eq!(complexity(&empty), 0.0);

        let mut soup = empty.clone();
        soup.randomize(0.5, 11).unwrap();
        let c = complexity(&soup);
        assert!(c > complexity(&block()));
        assert!(c <= 1.0);

        let flat = grid_with((6, 6, 1), RuleSet::default(), &[(1, 1, 0)]);
        assert_eq!(complexity(&flat), 0.0);
    }

    #[test]
    fn test_analyze_rule_from_soup_is_reproducible() {
        let executor = StepExecutor::new(2).unwrap();
        let analyzer = RuleAnalyzer::new(&executor).with_generations(8);
        let run = || {
            analyzer
                .analyze_rule(
                    RulePreset::R4555.rule(),
                    Dimensions::new(10, 10, 10),
                    BoundaryKind::Toroidal,
                    0.3,
                    5,
                )
                .unwrap()
        };
        let first = run();
        assert_eq!(first.population_history.len(), 9);
        assert_eq!(first, run());

        let json = serde_json::to_string(&first).unwrap();
        let back: RuleAnalysis = serde_json::from_str(&json).unwrap();
        assert_eq!(back.behavior, first.behavior);
    }
}
