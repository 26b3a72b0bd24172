use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, interval, interval_at};
use tracing::{error, info, warn};

use super::checker::Prober;
use super::evaluator::{CheckEvaluator, Evaluated};
use super::rotation::{LogRotator, RotationReport};
use super::types::CHECKS_COLLECTION;
use crate::alerts::AlertSender;
use crate::error::EngineError;
use crate::storage::{LogStore, RecordStore};

/// Timing of the two periodic loops
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub check_interval: Duration,
    pub rotation_interval: Duration,
    /// Run one rotation immediately at start, then on the interval
    pub rotate_on_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            rotation_interval: Duration::from_secs(60 * 60 * 24),
            rotate_on_start: true,
        }
    }
}

/// Outcome of one check sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    pub evaluated: Vec<Evaluated>,
    pub failures: Vec<EngineError>,
}

impl SweepReport {
    pub fn skipped(&self) -> usize {
        self.failures.iter().filter(|e| matches!(e, EngineError::Validation { .. })).count()
    }
}

/// The check monitoring engine.
///
/// Holds its collaborators explicitly so a test can drive one sweep with
/// [`Engine::run_check_sweep`] without any timer.
pub struct Engine {
    records: Arc<dyn RecordStore>,
    evaluator: Arc<CheckEvaluator>,
    rotator: Arc<LogRotator>,
    config: EngineConfig,
}

/// Handles of the two periodic loops
pub struct EngineHandle {
    check_loop: JoinHandle<()>,
    rotation_loop: JoinHandle<()>,
}

impl EngineHandle {
    /// Stop both loops. Sweeps already in flight run to completion.
    pub fn shutdown(&self) {
        self.check_loop.abort();
        self.rotation_loop.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.check_loop.is_finished() || !self.rotation_loop.is_finished()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Engine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        logs: Arc<dyn LogStore>,
        prober: Arc<dyn Prober>,
        alerts: Arc<dyn AlertSender>,
        config: EngineConfig,
    ) -> Self {
        let evaluator = Arc::new(CheckEvaluator::new(records.clone(), logs.clone(), prober, alerts));
        let rotator = Arc::new(LogRotator::new(logs));
        Self { records, evaluator, rotator, config }
    }

    /// Evaluate every stored check once, each in its own task, and wait
    /// for all of them
    pub async fn run_check_sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let ids = match self.records.list(CHECKS_COLLECTION).await {
            Ok(ids) => ids,
            Err(source) => {
                error!("Could not list checks: {}", source);
                report.failures.push(EngineError::ListChecks(source));
                return report;
            }
        };
        if ids.is_empty() {
            info!("Could not find any checks to process");
            return report;
        }

        let mut tasks = JoinSet::new();
        for id in ids {
            let evaluator = self.evaluator.clone();
            tasks.spawn(async move { evaluator.run(&id).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(evaluated)) => report.evaluated.push(evaluated),
                Ok(Err(e)) => report.failures.push(e),
                Err(e) => error!("Check task panicked: {}", e),
            }
        }

        info!(
            "Check sweep completed: {} evaluated, {} skipped, {} failed",
            report.evaluated.len(),
            report.skipped(),
            report.failures.len() - report.skipped()
        );
        report
    }

    pub async fn run_rotation_sweep(&self) -> RotationReport {
        self.rotator.rotate_all().await
    }

    /// Start the check loop and the rotation loop.
    ///
    /// Each tick spawns its sweep and goes back to waiting, a sweep that
    /// outlives the period overlaps with the next one.
    pub fn start(self: Arc<Self>) -> EngineHandle {
        info!(
            "Starting engine: checks every {:?}, log rotation every {:?}",
            self.config.check_interval, self.config.rotation_interval
        );

        let check_loop = {
            let engine = self.clone();
            tokio::spawn(async move {
                let mut timer = interval(engine.config.check_interval);
                loop {
                    timer.tick().await;
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        engine.run_check_sweep().await;
                    });
                }
            })
        };

        let rotation_loop = {
            let engine = self;
            tokio::spawn(async move {
                let period = engine.config.rotation_interval;
                // An interval's first tick is immediate
                let mut timer = if engine.config.rotate_on_start {
                    interval(period)
                } else {
                    interval_at(Instant::now() + period, period)
                };
                loop {
                    timer.tick().await;
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        let report = engine.run_rotation_sweep().await;
                        if !report.failures.is_empty() {
                            warn!("{} logs could not be rotated this cycle", report.failures.len());
                        }
                    });
                }
            })
        };

        EngineHandle { check_loop, rotation_loop }
    }
}
