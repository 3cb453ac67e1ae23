//! Out-of-band supervision: recovery, health, and the agent worker pool.
//!
//! [`PipelineMonitor`] owns its lifecycle. [`PipelineMonitor::start`] runs
//! the startup recovery pass and spawns a supervisor that repeats recovery,
//! health, and pool passes on their own intervals until
//! [`PipelineMonitor::stop`] is called. Every pass runs in its own task, so a
//! panic ends that pass and is logged while the supervisor keeps going.

use crate::bug::ports::BugRepository;
use crate::health::{ports::ArtifactStore, services::HealthChecker};
use crate::lock::ports::StageLockRepository;
use crate::pipeline::ports::QueueRepository;
use crate::recovery::{
    domain::RecoveryReport,
    services::{DispatchOutcome, RecoveryService, WorkerPool},
};
use mockable::Clock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Intervals of the periodic passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Period of the recovery pass.
    pub recovery_interval: Duration,
    /// Period of the health pass.
    pub health_interval: Duration,
    /// Period of the worker pool pass.
    pub pool_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            recovery_interval: Duration::from_secs(60),
            health_interval: Duration::from_secs(300),
            pool_interval: Duration::from_secs(10),
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    supervisor: JoinHandle<()>,
}

/// Runs recovery, health, and pool passes in the background.
pub struct PipelineMonitor<Q, L, B, A, C>
where
    Q: QueueRepository + 'static,
    L: StageLockRepository + 'static,
    B: BugRepository + 'static,
    A: ArtifactStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    recovery: Arc<RecoveryService<Q, L, B, C>>,
    health: Arc<HealthChecker<Q, A, C>>,
    pool: Option<Arc<WorkerPool<B, C>>>,
    settings: MonitorSettings,
    running: Option<Running>,
}

impl<Q, L, B, A, C> PipelineMonitor<Q, L, B, A, C>
where
    Q: QueueRepository + 'static,
    L: StageLockRepository + 'static,
    B: BugRepository + 'static,
    A: ArtifactStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a stopped monitor. Without a pool, no agents are dispatched.
    #[must_use]
    pub fn new(
        recovery: RecoveryService<Q, L, B, C>,
        health: HealthChecker<Q, A, C>,
        pool: Option<WorkerPool<B, C>>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            recovery: Arc::new(recovery),
            health: Arc::new(health),
            pool: pool.map(Arc::new),
            settings,
            running: None,
        }
    }

    /// Returns whether the supervisor is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Returns the worker pool, when one is configured.
    #[must_use]
    pub const fn pool(&self) -> Option<&Arc<WorkerPool<B, C>>> {
        self.pool.as_ref()
    }

    /// Runs startup recovery, then spawns the periodic supervisor.
    ///
    /// Returns the startup report, or `None` when the pass panicked or the
    /// monitor was already running.
    pub async fn start(&mut self) -> Option<RecoveryReport> {
        if self.running.is_some() {
            warn!("pipeline monitor already running");
            return None;
        }
        let recovery = Arc::clone(&self.recovery);
        let report = guarded("startup recovery", async move { recovery.run_startup().await }).await;

        let shutdown = CancellationToken::new();
        let supervisor = tokio::spawn(
            Supervisor {
                recovery: Arc::clone(&self.recovery),
                health: Arc::clone(&self.health),
                pool: self.pool.clone(),
                settings: self.settings,
                shutdown: shutdown.clone(),
            }
            .run(),
        );
        self.running = Some(Running {
            shutdown,
            supervisor,
        });
        info!(settings = ?self.settings, "pipeline monitor started");
        report
    }

    /// Stops the supervisor, waits for the pass in flight, and releases
    /// every bug held by pool workers.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.shutdown.cancel();
        if let Err(err) = running.supervisor.await {
            error!(error = %err, "pipeline monitor supervisor ended abnormally");
        }
        if let Some(pool) = &self.pool {
            let worker_pool = Arc::clone(pool);
            let released =
                guarded("pool shutdown", async move { worker_pool.shutdown().await }).await;
            if let Some(Err(err)) = released {
                warn!(error = %err, "releasing pool bugs on shutdown failed");
            }
        }
        info!("pipeline monitor stopped");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

struct Supervisor<Q, L, B, A, C>
where
    Q: QueueRepository + 'static,
    L: StageLockRepository + 'static,
    B: BugRepository + 'static,
    A: ArtifactStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    recovery: Arc<RecoveryService<Q, L, B, C>>,
    health: Arc<HealthChecker<Q, A, C>>,
    pool: Option<Arc<WorkerPool<B, C>>>,
    settings: MonitorSettings,
    shutdown: CancellationToken,
}

impl<Q, L, B, A, C> Supervisor<Q, L, B, A, C>
where
    Q: QueueRepository + 'static,
    L: StageLockRepository + 'static,
    B: BugRepository + 'static,
    A: ArtifactStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn run(self) {
        let mut recovery_tick = ticker(self.settings.recovery_interval);
        let mut health_tick = ticker(self.settings.health_interval);
        let mut pool_tick = ticker(self.settings.pool_interval);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = recovery_tick.tick() => {
                    let service = Arc::clone(&self.recovery);
                    guarded("periodic recovery", async move { service.run_periodic().await }).await;
                }
                _ = health_tick.tick() => {
                    let checker = Arc::clone(&self.health);
                    guarded("health check", async move { checker.run_pass().await }).await;
                }
                _ = pool_tick.tick(), if self.pool.is_some() => {
                    if let Some(worker_pool) = self.pool.clone() {
                        guarded("worker pool", async move { pool_pass(&worker_pool).await }).await;
                    }
                }
            }
        }
        debug!("pipeline monitor supervisor exiting");
    }
}

async fn pool_pass<B, C>(pool: &WorkerPool<B, C>)
where
    B: BugRepository,
    C: Clock + Send + Sync,
{
    if let Err(err) = pool.collect_exits().await {
        warn!(error = %err, "collecting agent exits failed");
    }
    if let Err(err) = pool.cleanup_dead_workers().await {
        warn!(error = %err, "dead worker cleanup failed");
    }
    match pool.dispatch().await {
        Ok(DispatchOutcome::Spawned { bug_id, pid, .. }) => {
            debug!(bug_id = %bug_id, pid, "agent dispatched");
        }
        Ok(outcome) => debug!(outcome = ?outcome, "no agent dispatched"),
        Err(err) => warn!(error = %err, "agent dispatch failed"),
    }
}

async fn guarded<F>(pass: &'static str, work: F) -> Option<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(output) => Some(output),
        Err(err) if err.is_panic() => {
            error!(pass, "monitor pass panicked");
            None
        }
        Err(err) => {
            warn!(pass, error = %err, "monitor pass cancelled");
            None
        }
    }
}
