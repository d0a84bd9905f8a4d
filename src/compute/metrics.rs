//! Step metrics with lock-free recording and push delivery.
//!
//! The driving thread records one [`StepReport`] per generation into
//! atomic counters. Every `interval` steps a snapshot is offered to a
//! notifier thread over a bounded channel; if the channel is full the
//! snapshot is dropped rather than stalling the step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use super::StepReport;

/// Callback invoked with periodic snapshots.
pub type PerformanceCallback = dyn Fn(&MetricsSnapshot) + Send + Sync;

/// Pending snapshots the notifier may hold before new ones are dropped.
const NOTIFY_QUEUE: usize = 16;

/// Weight of the newest sample in the rolling memory efficiency.
const EFFICIENCY_SMOOTHING: f64 = 0.2;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub steps: u64,
    pub cells_processed: u64,
    pub last_step_nanos: u64,
    pub total_step_nanos: u64,
    pub average_step_nanos: u64,
    pub cells_per_second: f64,
    /// Rolling average of used over allocated bytes of the grid buffers.
    pub memory_efficiency: f64,
    pub population: u64,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct Counters {
    steps: AtomicU64,
    cells: AtomicU64,
    last_nanos: AtomicU64,
    total_nanos: AtomicU64,
    /// f64 stored as raw bits.
    cells_per_second: AtomicU64,
    /// f64 stored as raw bits.
    memory_efficiency: AtomicU64,
    population: AtomicU64,
    generation: AtomicU64,
}

type Registry = Arc<Mutex<Vec<Weak<PerformanceCallback>>>>;

/// Collects per-step performance counters.
pub struct MetricsCollector {
    counters: Counters,
    interval: u64,
    callbacks: Registry,
    sender: Option<SyncSender<MetricsSnapshot>>,
    notifier: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("interval", &self.interval)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl MetricsCollector {
    /// Create a collector pushing snapshots every `interval` steps.
    ///
    /// An interval of 0 disables push delivery; `snapshot` still works.
    pub fn new(interval: u64) -> Self {
        let callbacks: Registry = Arc::new(Mutex::new(Vec::new()));
        let (sender, notifier) = if interval > 0 {
            let (tx, rx) = mpsc::sync_channel::<MetricsSnapshot>(NOTIFY_QUEUE);
            let registry = Arc::clone(&callbacks);
            let handle = std::thread::Builder::new()
                .name("voxel-life-metrics".to_string())
                .spawn(move || {
                    for snapshot in rx {
                        notify(&registry, &snapshot);
                    }
                })
                .ok();
            match handle {
                Some(handle) => (Some(tx), Some(handle)),
                None => {
                    log::warn!("Could not start metrics notifier; push delivery disabled");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        Self {
            counters: Counters::default(),
            interval,
            callbacks,
            sender,
            notifier,
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Record one committed step.
    pub fn record(&self, report: &StepReport, used_bytes: usize, allocated_bytes: usize) {
        let c = &self.counters;
        let nanos = report.elapsed.as_nanos().min(u64::MAX as u128) as u64;
        let steps = c.steps.fetch_add(1, Ordering::Relaxed) + 1;
        c.cells.fetch_add(report.cells as u64, Ordering::Relaxed);
        c.last_nanos.store(nanos, Ordering::Relaxed);
        c.total_nanos.fetch_add(nanos, Ordering::Relaxed);

        let secs = report.elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            report.cells as f64 / secs
        } else {
            0.0
        };
        c.cells_per_second
            .store(rate.to_bits(), Ordering::Relaxed);

        let sample = if allocated_bytes > 0 {
            used_bytes as f64 / allocated_bytes as f64
        } else {
            0.0
        };
        // Exponential moving average; only the driving thread records.
        let efficiency = if steps == 1 {
            sample
        } else {
            let prev = f64::from_bits(c.memory_efficiency.load(Ordering::Relaxed));
            prev + EFFICIENCY_SMOOTHING * (sample - prev)
        };
        c.memory_efficiency
            .store(efficiency.to_bits(), Ordering::Relaxed);
        c.population.store(report.alive, Ordering::Relaxed);
        c.generation.store(report.generation, Ordering::Relaxed);

        if let Some(sender) = &self.sender
            && steps % self.interval == 0
        {
            match sender.try_send(self.snapshot()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::debug!("Metrics notifier busy; snapshot at step {steps} dropped");
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::warn!("Metrics notifier stopped");
                }
            }
        }
    }

    /// Current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        let steps = c.steps.load(Ordering::Relaxed);
        let total = c.total_nanos.load(Ordering::Relaxed);
        MetricsSnapshot {
            steps,
            cells_processed: c.cells.load(Ordering::Relaxed),
            last_step_nanos: c.last_nanos.load(Ordering::Relaxed),
            total_step_nanos: total,
            average_step_nanos: if steps > 0 { total / steps } else { 0 },
            cells_per_second: f64::from_bits(c.cells_per_second.load(Ordering::Relaxed)),
            memory_efficiency: f64::from_bits(c.memory_efficiency.load(Ordering::Relaxed)),
            population: c.population.load(Ordering::Relaxed),
            generation: c.generation.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Registrations are kept.
    pub fn reset(&self) {
        let c = &self.counters;
        for counter in [
            &c.steps,
            &c.cells,
            &c.last_nanos,
            &c.total_nanos,
            &c.cells_per_second,
            &c.memory_efficiency,
            &c.population,
            &c.generation,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Register `callback` without taking ownership of it.
    ///
    /// The registration lapses once every `Arc` to the callback is dropped.
    pub fn register_callback<F>(&self, callback: &Arc<F>)
    where
        F: Fn(&MetricsSnapshot) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(callback);
        let weak: Weak<PerformanceCallback> = weak;
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(weak);
    }

    /// Registrations whose callback is still alive.
    pub fn callback_count(&self) -> usize {
        let mut callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        callbacks.retain(|w| w.strong_count() > 0);
        callbacks.len()
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        // Closing the channel ends the notifier loop after it drains.
        self.sender.take();
        if let Some(handle) = self.notifier.take()
            && handle.join().is_err()
        {
            log::warn!("Metrics notifier panicked");
        }
    }
}

/// Deliver `snapshot` to live callbacks and prune dead ones.
fn notify(registry: &Mutex<Vec<Weak<PerformanceCallback>>>, snapshot: &MetricsSnapshot) {
    let live: Vec<Arc<PerformanceCallback>> = {
        let mut callbacks = registry.lock().unwrap_or_else(PoisonError::into_inner);
        callbacks.retain(|w| w.strong_count() > 0);
        callbacks.iter().filter_map(Weak::upgrade).collect()
    };
    // Invoked without the lock so callbacks may register others.
    for callback in live {
        callback(snapshot);
    }
}
