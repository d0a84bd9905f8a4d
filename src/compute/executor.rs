//! Parallel step executor.
//!
//! The cell range is split into contiguous chunks, one per worker. Every
//! worker reads the shared current buffer and writes only its own slice
//! of the next buffer, so the hot path needs no locks. The buffers are
//! swapped only once every chunk has finished.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::{Grid, count_neighbors, evolve_cell};
use crate::error::EngineError;

/// Outcome of one committed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    /// Cells evaluated.
    pub cells: usize,
    /// Live cells in the new generation.
    pub alive: u64,
    /// Generation number after the commit.
    pub generation: u64,
    /// Wall time from dispatch to barrier.
    pub elapsed: Duration,
    /// Chunks the work was split into.
    pub workers: usize,
}

/// Split `0..total` into `min(workers, total)` contiguous ranges.
///
/// The first `total % W` ranges are one cell longer than the rest.
pub fn partition(total: usize, workers: usize) -> Vec<Range<usize>> {
    let chunks = workers.max(1).min(total);
    if chunks == 0 {
        return Vec::new();
    }
    let base = total / chunks;
    let extra = total % chunks;

    let mut ranges = Vec::with_capacity(chunks);
    let mut start = 0;
    for i in 0..chunks {
        let len = base + usize::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Deliberate failures for exercising the abort path.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    /// Worker `n` returns an error.
    Error(usize),
    /// Worker `n` panics.
    Panic(usize),
    /// Every worker sleeps before computing.
    Delay(Duration),
}

/// Persistent worker pool that advances a [`Grid`] one generation at a time.
pub struct StepExecutor {
    pool: rayon::ThreadPool,
    workers: usize,
    #[cfg(test)]
    fault: Option<Fault>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("workers", &self.workers)
            .finish()
    }
}

impl StepExecutor {
    /// Build the pool once; it is reused for every step.
    pub fn new(workers: usize) -> Result<Self, EngineError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("voxel-life-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            workers,
            #[cfg(test)]
            fault: None,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self, fault: Option<Fault>) {
        self.fault = fault;
    }

    /// Advance `grid` by one generation.
    ///
    /// On error the buffers are not swapped and the generation and
    /// population are unchanged.
    pub fn step(&self, grid: &mut Grid) -> Result<StepReport, EngineError> {
        let start = Instant::now();
        let (alive, workers) = self.compute_next(grid)?;
        let elapsed = start.elapsed();
        grid.commit_step(alive);
        Ok(StepReport {
            cells: grid.total_cells(),
            alive,
            generation: grid.generation(),
            elapsed,
            workers,
        })
    }

    /// Like [`step`](Self::step), but a result arriving after `limit` is
    /// discarded and the grid keeps its current generation.
    pub fn step_with_timeout(
        &self,
        grid: &mut Grid,
        limit: Duration,
    ) -> Result<StepReport, EngineError> {
        let start = Instant::now();
        let (alive, workers) = self.compute_next(grid)?;
        let elapsed = start.elapsed();
        if elapsed > limit {
            return Err(EngineError::StepTimedOut { elapsed, limit });
        }
        grid.commit_step(alive);
        Ok(StepReport {
            cells: grid.total_cells(),
            alive,
            generation: grid.generation(),
            elapsed,
            workers,
        })
    }

    /// Fill the next buffer. Returns the live count and chunk count.
    fn compute_next(&self, grid: &mut Grid) -> Result<(u64, usize), EngineError> {
        let dims = grid.dimensions();
        let boundary = grid.boundary();
        let rule = grid.rule().clone();
        let params = *grid.params();
        let (current, next) = grid.step_buffers();

        let ranges = partition(next.len(), self.workers);
        let workers = ranges.len();
        let mut chunks = Vec::with_capacity(workers);
        let mut rest = next;
        for range in &ranges {
            let (head, tail) = rest.split_at_mut(range.len());
            chunks.push((range.start, head));
            rest = tail;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pool.install(|| {
                chunks
                    .into_par_iter()
                    .enumerate()
                    .map(|(worker, (start, out))| {
                        #[cfg(test)]
                        self.apply_fault(worker)?;
                        #[cfg(not(test))]
                        let _ = worker;

                        let mut alive = 0u64;
                        for (offset, slot) in out.iter_mut().enumerate() {
                            let idx = start + offset;
                            let pos = dims.position(idx);
                            let neighbors = count_neighbors(current, dims, boundary, pos);
                            let cell = evolve_cell(current[idx], neighbors, &rule, &params);
                            alive += cell.is_alive() as u64;
                            *slot = cell;
                        }
                        Ok::<u64, EngineError>(alive)
                    })
                    .try_reduce(|| 0, |a, b| Ok(a + b))
            })
        }));

        match outcome {
            Ok(result) => result.map(|alive| (alive, workers)),
            Err(payload) => Err(EngineError::StepAborted(panic_message(payload.as_ref()))),
        }
    }

    #[cfg(test)]
    fn apply_fault(&self, worker: usize) -> Result<(), EngineError> {
        match self.fault {
            Some(Fault::Error(n)) if n == worker => Err(EngineError::StepAborted(format!(
                "worker {worker} failed"
            ))),
            Some(Fault::Panic(n)) if n == worker => panic!("worker {worker} panicked"),
            Some(Fault::Delay(d)) => {
                std::thread::sleep(d);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
