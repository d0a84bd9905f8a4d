//! Simulation backends and the run driver.
//!
//! A backend owns one grid and knows how to advance it. [`CpuBackend`]
//! uses the rayon [`StepExecutor`]; [`GpuBackend`] runs a compute shader.
//! [`Backend`] picks one at construction and keeps it for its lifetime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::gpu::GpuBackend;
use super::{Dimensions, Grid, MetricsCollector, MetricsSnapshot, StepExecutor, StepReport};
use crate::error::EngineError;
use crate::pattern::{self, Compression, PatternMetadata};
use crate::schema::{BackendKind, BoundaryKind, EngineContext, RuleSet, SimulationConfig};

/// State shared by every backend: context, grid, pending rule and metrics.
#[derive(Debug)]
pub struct EngineCore {
    ctx: EngineContext,
    pub(crate) grid: Option<Grid>,
    rule: RuleSet,
    boundary: BoundaryKind,
    metrics: MetricsCollector,
}

impl EngineCore {
    pub fn new(ctx: EngineContext) -> Self {
        let metrics = MetricsCollector::new(ctx.metrics_interval);
        Self {
            ctx,
            grid: None,
            rule: RuleSet::default(),
            boundary: BoundaryKind::default(),
            metrics,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    #[inline]
    pub fn log_target(&self) -> &str {
        &self.ctx.log_target
    }

    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    pub fn require_grid(&self) -> Result<&Grid, EngineError> {
        self.grid.as_ref().ok_or(EngineError::NotInitialized)
    }

    pub fn require_grid_mut(&mut self) -> Result<&mut Grid, EngineError> {
        self.grid.as_mut().ok_or(EngineError::NotInitialized)
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Feed a committed step into the metrics and the debug log.
    pub(crate) fn record(&self, report: &StepReport) {
        if let Some(grid) = &self.grid {
            self.metrics
                .record(report, grid.used_bytes(), grid.allocated_bytes());
        }
        log::debug!(
            target: self.log_target(),
            "Generation {}: {} alive, {:.3} ms over {} workers",
            report.generation,
            report.alive,
            report.elapsed.as_secs_f64() * 1000.0,
            report.workers
        );
    }
}

/// Common interface of the compute backends.
pub trait SimulationBackend {
    fn kind(&self) -> BackendKind;

    fn core(&self) -> &EngineCore;

    fn core_mut(&mut self) -> &mut EngineCore;

    /// Advance one generation.
    ///
    /// Fails with `NotInitialized` before [`initialize`](Self::initialize).
    fn step(&mut self) -> Result<StepReport, EngineError>;

    /// Allocate an all-dead grid, replacing any existing one.
    fn initialize(&mut self, dims: Dimensions) -> Result<(), EngineError> {
        let kind = self.kind();
        let core = self.core_mut();
        let grid = Grid::new(dims, core.rule.clone(), core.boundary, core.ctx.params)?;
        log::info!(
            target: core.log_target(),
            "Initialized {} grid ({} cells) on {:?} backend with rule {}, {} boundary",
            dims,
            grid.total_cells(),
            kind,
            core.rule,
            core.boundary
        );
        core.grid = Some(grid);
        Ok(())
    }

    fn grid(&self) -> Option<&Grid> {
        self.core().grid()
    }

    fn set_cell(&mut self, x: u32, y: u32, z: u32, alive: bool) -> Result<(), EngineError> {
        self.core_mut().require_grid_mut()?.set_cell(x, y, z, alive)
    }

    fn get_cell(&self, x: u32, y: u32, z: u32) -> Result<bool, EngineError> {
        self.core().require_grid()?.get_cell(x, y, z)
    }

    fn randomize(&mut self, density: f64, seed: u64) -> Result<(), EngineError> {
        self.core_mut().require_grid_mut()?.randomize(density, seed)
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        self.core_mut().require_grid_mut()?.clear();
        Ok(())
    }

    fn resize(&mut self, dims: Dimensions) -> Result<(), EngineError> {
        let core = self.core_mut();
        let grid = core.grid.as_mut().ok_or(EngineError::NotInitialized)?;
        grid.resize(dims.width, dims.height, dims.depth)?;
        log::info!(target: core.log_target(), "Resized grid to {}", dims);
        Ok(())
    }

    /// Replace the grid with a decoded pattern.
    ///
    /// On error the current grid, rule and boundary are kept.
    fn load_pattern(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        let core = self.core_mut();
        let loaded = pattern::Pattern::decode(bytes)?;
        let grid = loaded.to_grid(&core.ctx.params)?;
        log::info!(
            target: core.log_target(),
            "Loaded pattern '{}' ({}, {} alive, generation {})",
            loaded.metadata.name,
            grid.dimensions(),
            grid.population(),
            grid.generation()
        );
        core.rule = grid.rule().clone();
        core.boundary = grid.boundary();
        core.grid = Some(grid);
        Ok(())
    }

    /// Encode the current grid.
    fn save_pattern(&self, metadata: &PatternMetadata) -> Result<Vec<u8>, EngineError> {
        let grid = self.core().require_grid()?;
        Ok(pattern::save(grid, metadata, Compression::Auto)?)
    }

    /// Change the rule; applies from the next step.
    fn set_rule_set(&mut self, rule: RuleSet) -> Result<(), EngineError> {
        rule.validate()?;
        let core = self.core_mut();
        if let Some(grid) = core.grid.as_mut() {
            grid.set_rule(rule.clone())?;
        }
        log::info!(target: core.log_target(), "Rule set to {}", rule);
        core.rule = rule;
        Ok(())
    }

    fn set_boundary_kind(&mut self, boundary: BoundaryKind) {
        let core = self.core_mut();
        if let Some(grid) = core.grid.as_mut() {
            grid.set_boundary(boundary);
        }
        core.boundary = boundary;
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.core().metrics().snapshot()
    }

    fn reset_metrics(&self) {
        self.core().metrics().reset();
    }

    /// Register a non-owning performance callback.
    fn register_performance_callback<F>(&self, callback: &Arc<F>)
    where
        Self: Sized,
        F: Fn(&MetricsSnapshot) + Send + Sync + 'static,
    {
        self.core().metrics().register_callback(callback);
    }
}

/// Multi-threaded CPU backend.
#[derive(Debug)]
pub struct CpuBackend {
    core: EngineCore,
    executor: StepExecutor,
}

impl CpuBackend {
    pub fn new(ctx: EngineContext) -> Result<Self, EngineError> {
        let executor = StepExecutor::new(ctx.workers)?;
        Ok(Self {
            core: EngineCore::new(ctx),
            executor,
        })
    }

    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    /// Step, discarding the result if it takes longer than `limit`.
    pub fn step_with_timeout(&mut self, limit: Duration) -> Result<StepReport, EngineError> {
        let grid = self.core.require_grid_mut()?;
        let outcome = self.executor.step_with_timeout(grid, limit);
        self.finish(outcome)
    }

    fn finish(
        &self,
        outcome: Result<StepReport, EngineError>,
    ) -> Result<StepReport, EngineError> {
        match outcome {
            Ok(report) => {
                self.core.record(&report);
                Ok(report)
            }
            Err(e @ EngineError::StepTimedOut { .. }) => {
                log::warn!(target: self.core.log_target(), "{e}");
                Err(e)
            }
            Err(e) => {
                log::error!(target: self.core.log_target(), "{e}");
                Err(e)
            }
        }
    }
}

impl SimulationBackend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn core(&self) -> &EngineCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EngineCore {
        &mut self.core
    }

    fn step(&mut self) -> Result<StepReport, EngineError> {
        let grid = self.core.require_grid_mut()?;
        let outcome = self.executor.step(grid);
        self.finish(outcome)
    }
}

/// Backend chosen once at construction.
pub enum Backend {
    Cpu(CpuBackend),
    Gpu(Box<GpuBackend>),
}

impl Backend {
    /// Construct the requested backend.
    ///
    /// GPU construction blocks until the device is ready and fails with
    /// `GpuError::NoAdapter` when no adapter is available.
    pub fn new(kind: BackendKind, ctx: EngineContext) -> Result<Self, EngineError> {
        match kind {
            BackendKind::Cpu => Ok(Backend::Cpu(CpuBackend::new(ctx)?)),
            BackendKind::Gpu => {
                let gpu = pollster::block_on(GpuBackend::new(ctx))?;
                Ok(Backend::Gpu(Box::new(gpu)))
            }
        }
    }
}

impl SimulationBackend for Backend {
    fn kind(&self) -> BackendKind {
        match self {
            Backend::Cpu(b) => b.kind(),
            Backend::Gpu(b) => b.kind(),
        }
    }

    fn core(&self) -> &EngineCore {
        match self {
            Backend::Cpu(b) => b.core(),
            Backend::Gpu(b) => b.core(),
        }
    }

    fn core_mut(&mut self) -> &mut EngineCore {
        match self {
            Backend::Cpu(b) => b.core_mut(),
            Backend::Gpu(b) => b.core_mut(),
        }
    }

    fn step(&mut self) -> Result<StepReport, EngineError> {
        match self {
            Backend::Cpu(b) => b.step(),
            Backend::Gpu(b) => b.step(),
        }
    }
}

/// Outcome of [`Simulation::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Generations completed by this call.
    pub steps: u64,
    /// Whether the run stopped early on the cancellation flag.
    pub interrupted: bool,
    /// Report of the last completed step.
    pub last: Option<StepReport>,
}

/// Run driver with pause and cancellation between generations.
pub struct Simulation {
    backend: Backend,
    cancel: Arc<AtomicBool>,
}

impl Simulation {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build, initialize and seed a simulation from configuration.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let mut backend = Backend::new(config.backend, config.context())?;
        backend.set_rule_set(config.rule.to_rule_set()?)?;
        backend.set_boundary_kind(config.boundary);
        backend.initialize(Dimensions::new(config.width, config.height, config.depth))?;
        if let Some(seed) = &config.seed {
            backend.randomize(seed.density, seed.seed)?;
        }
        Ok(Self::new(backend))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut Backend {
        &mut self.backend
    }

    pub fn grid(&self) -> Option<&Grid> {
        self.backend.grid()
    }

    /// Flag checked before every generation of [`run`](Self::run).
    ///
    /// Setting it from any thread stops the run at the next generation
    /// boundary; a step already in progress always completes or aborts
    /// as a whole.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn pause(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Single generation regardless of the pause flag.
    pub fn step(&mut self) -> Result<StepReport, EngineError> {
        self.backend.step()
    }

    /// Run up to `steps` generations, stopping early when paused.
    pub fn run(&mut self, steps: u64) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary {
            steps: 0,
            interrupted: false,
            last: None,
        };
        for _ in 0..steps {
            if self.is_paused() {
                summary.interrupted = true;
                log::info!(
                    target: self.backend.core().log_target(),
                    "Run paused after {} of {} generations",
                    summary.steps,
                    steps
                );
                break;
            }
            summary.last = Some(self.backend.step()?);
            summary.steps += 1;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::CellParams;
    use crate::schema::{NeighborRange, RulePreset, SeedConfig};
    use std::sync::Mutex;

    fn cpu(workers: usize) -> CpuBackend {
        CpuBackend::new(
            EngineContext::default()
                .with_workers(workers)
                .with_log_target("voxel_life::test"),
        )
        .unwrap()
    }

    #[test]
    fn test_step_before_initialize_changes_nothing() {
        let mut backend = cpu(2);
        assert!(matches!(backend.step(), Err(EngineError::NotInitialized)));
        assert!(matches!(
            backend.set_cell(0, 0, 0, true),
            Err(EngineError::NotInitialized)
        ));
        assert!(backend.grid().is_none());
        assert_eq!(backend.metrics().steps, 0);
    }

    #[test]
    fn test_initialize_rejects_zero_extent() {
        let mut backend = cpu(2);
        assert!(matches!(
            backend.initialize(Dimensions::new(0, 4, 4)),
            Err(EngineError::InvalidDimensions { .. })
        ));
        assert!(backend.grid().is_none());
    }

    #[test]
    fn test_rule_and_boundary_set_before_initialize_apply() {
        let mut backend = cpu(2);
        backend.set_rule_set(RulePreset::R2333.rule()).unwrap();
        backend.set_boundary_kind(BoundaryKind::Mirror);
        backend.initialize(Dimensions::new(3, 3, 3)).unwrap();
        backend.set_cell(1, 1, 1, true).unwrap();

        let report = backend.step().unwrap();
        assert_eq!(report.alive, 12);
        assert_eq!(report.generation, 1);
        assert_eq!(backend.grid().unwrap().boundary(), BoundaryKind::Mirror);
    }

    #[test]
    fn test_invalid_rule_is_rejected_and_previous_kept() {
        let mut backend = cpu(1);
        backend.initialize(Dimensions::new(4, 4, 4)).unwrap();
        let bad = RuleSet {
            name: "bad".to_string(),
            birth: NeighborRange::new(3, 2),
            survival: NeighborRange::new(1, 1),
        };
        assert!(matches!(
            backend.set_rule_set(bad),
            Err(EngineError::UnsupportedRuleSet(_))
        ));
        assert_eq!(backend.grid().unwrap().rule(), &RuleSet::default());
    }

    #[test]
    fn test_metrics_follow_steps() {
        let mut backend = cpu(2);
        backend.initialize(Dimensions::new(6, 6, 6)).unwrap();
        backend.randomize(0.3, 4).unwrap();
        for _ in 0..3 {
            backend.step().unwrap();
        }
        let snap = backend.metrics();
        assert_eq!(snap.steps, 3);
        assert_eq!(snap.cells_processed, 3 * 216);
        assert_eq!(snap.generation, 3);
        assert_eq!(snap.population, backend.grid().unwrap().population());
        assert!(snap.memory_efficiency > 0.0 && snap.memory_efficiency <= 1.0);

        backend.reset_metrics();
        assert_eq!(backend.metrics().steps, 0);
    }

    #[test]
    fn test_memory_efficiency_drops_after_shrink() {
        let mut backend = cpu(2);
        backend.initialize(Dimensions::new(8, 8, 8)).unwrap();
        backend.randomize(0.3, 9).unwrap();
        backend.step().unwrap();
        assert_eq!(backend.metrics().memory_efficiency, 1.0);

        backend.resize(Dimensions::new(4, 4, 4)).unwrap();
        for _ in 0..5 {
            backend.step().unwrap();
        }
        let grid = backend.grid().unwrap();
        assert!(grid.used_bytes() < grid.allocated_bytes());
        let efficiency = backend.metrics().memory_efficiency;
        assert!(efficiency < 1.0);
        assert!(efficiency > 0.125);
    }

    #[test]
    fn test_initialize_rejects_unrepresentable_max_age() {
        let ctx = EngineContext {
            params: CellParams {
                max_age: 40000,
                ..CellParams::default()
            },
            ..EngineContext::default()
        };
        let mut backend = CpuBackend::new(ctx).unwrap();
        assert!(matches!(
            backend.initialize(Dimensions::new(2, 2, 2)),
            Err(EngineError::InvalidMaxAge(40000))
        ));
        assert!(backend.grid().is_none());
    }

    #[test]
    fn test_performance_callback_through_backend() {
        let ctx = EngineContext {
            metrics_interval: 1,
            ..EngineContext::default()
        }
        .with_workers(2);
        let mut backend = CpuBackend::new(ctx).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = Arc::new(move |snap: &MetricsSnapshot| {
            sink.lock().unwrap().push(snap.generation);
        });
        backend.register_performance_callback(&callback);
        backend.initialize(Dimensions::new(4, 4, 4)).unwrap();
        backend.step().unwrap();
        backend.step().unwrap();
        drop(backend);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_save_and_load_pattern_through_backend() {
        let mut source = cpu(2);
        source.set_rule_set(RulePreset::R4556.rule()).unwrap();
        source.set_boundary_kind(BoundaryKind::Fixed);
        source.initialize(Dimensions::new(5, 6, 7)).unwrap();
        source.randomize(0.4, 99).unwrap();
        source.step().unwrap();
        let bytes = source
            .save_pattern(&PatternMetadata::named("roundtrip"))
            .unwrap();

        let mut target = cpu(3);
        target.load_pattern(&bytes).unwrap();
        let (a, b) = (source.grid().unwrap(), target.grid().unwrap());
        assert_eq!(a.dimensions(), b.dimensions());
        assert_eq!(a.rule(), b.rule());
        assert_eq!(b.boundary(), BoundaryKind::Fixed);
        assert_eq!(a.generation(), b.generation());
        assert_eq!(a.population(), b.population());
        let alive_a: Vec<bool> = a.current().iter().map(|c| c.is_alive()).collect();
        let alive_b: Vec<bool> = b.current().iter().map(|c| c.is_alive()).collect();
        assert_eq!(alive_a, alive_b);

        // Later steps use the loaded rule.
        target.step().unwrap();
        assert_eq!(target.grid().unwrap().rule().name, "4556");
    }

    #[test]
    fn test_truncated_pattern_leaves_grid_unchanged() {
        let mut backend = cpu(2);
        backend.initialize(Dimensions::new(4, 4, 4)).unwrap();
        backend.randomize(0.5, 1).unwrap();
        let bytes = backend.save_pattern(&PatternMetadata::default()).unwrap();
        let before = backend.grid().unwrap().current().to_vec();

        backend.set_rule_set(RulePreset::R6777.rule()).unwrap();
        let err = backend.load_pattern(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, EngineError::PatternFormat(_)));
        assert_eq!(backend.grid().unwrap().current(), before.as_slice());
        assert_eq!(backend.grid().unwrap().rule().name, "6777");
    }

    #[test]
    fn test_run_respects_pause() {
        let config = SimulationConfig {
            width: 8,
            height: 8,
            depth: 8,
            workers: 2,
            seed: Some(SeedConfig {
                density: 0.3,
                seed: 5,
            }),
            ..Default::default()
        };
        let mut sim = Simulation::from_config(&config).unwrap();
        let summary = sim.run(4).unwrap();
        assert_eq!(summary.steps, 4);
        assert!(!summary.interrupted);
        assert_eq!(summary.last.unwrap().generation, 4);

        sim.cancel_handle().store(true, Ordering::SeqCst);
        let summary = sim.run(10).unwrap();
        assert_eq!(summary.steps, 0);
        assert!(summary.interrupted);
        assert_eq!(sim.grid().unwrap().generation(), 4);

        sim.resume();
        assert_eq!(sim.run(2).unwrap().steps, 2);
        assert_eq!(sim.grid().unwrap().generation(), 6);
    }

    #[test]
    fn test_cancel_from_another_thread_stops_run() {
        let config = SimulationConfig {
            width: 4,
            height: 4,
            depth: 4,
            workers: 1,
            metrics_interval: 0,
            ..Default::default()
        };
        let mut sim = Simulation::from_config(&config).unwrap();
        let handle = sim.cancel_handle();
        let stopper = std::thread::spawn(move || handle.store(true, Ordering::SeqCst));
        stopper.join().unwrap();
        assert!(sim.run(100).unwrap().interrupted);
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let config = SimulationConfig {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(
            Simulation::from_config(&config),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_custom_cell_params_flow_to_grid() {
        let ctx = EngineContext {
            params: CellParams {
                max_age: 10,
                energy_decay: 5,
                birth_energy: 42,
            },
            ..EngineContext::default()
        };
        let mut backend = CpuBackend::new(ctx).unwrap();
        backend.initialize(Dimensions::new(2, 2, 2)).unwrap();
        backend.set_cell(0, 0, 0, true).unwrap();
        let cell = backend.grid().unwrap().cell(0, 0, 0).unwrap();
        assert_eq!(cell.energy(), 42);
    }
}
