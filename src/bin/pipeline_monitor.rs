//! Runs recovery, health reconciliation, and the agent worker pool.
//!
//! ```text
//! pipeline-monitor --database-url postgres://... --tasks-root ./tasks \
//!     --agent-program claude --agent-arg fix-bug --agent-arg '{{ bug_id }}'
//! ```

use clap::Parser;
use eyre::{Result, WrapErr};
use mockable::DefaultClock;
use reelwright::bug::{adapters::postgres::PostgresBugRepository, services::BugTracker};
use reelwright::config::{AgentConfig, ArtifactConfig, DatabaseConfig, PollingConfig, load_dotenv};
use reelwright::health::{adapters::TaskDirectoryStore, services::HealthChecker};
use reelwright::lock::{adapters::postgres::PostgresStageLockRepository, services::StageLockService};
use reelwright::monitor::{MonitorSettings, PipelineMonitor};
use reelwright::persistence::build_pool;
use reelwright::pipeline::{adapters::postgres::PostgresQueueRepository, services::QueueManager};
use reelwright::recovery::{
    adapters::{CommandLauncher, platform_liveness},
    ports::WorkerLauncher,
    services::{PoolSettings, RecoveryService, WorkerPool},
};
use reelwright::signal::shutdown_signal;
use reelwright::telemetry::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "pipeline-monitor", version, about = "Pipeline recovery and health monitor")]
struct Cli {
    #[command(flatten)]
    database: DatabaseConfig,

    #[command(flatten)]
    polling: PollingConfig,

    #[command(flatten)]
    artifacts: ArtifactConfig,

    #[command(flatten)]
    agent: AgentConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv().wrap_err("failed to load .env")?;
    let cli = Cli::parse();
    init_tracing()?;

    let pool = build_pool(&cli.database.url, cli.database.pool_size)
        .wrap_err("failed to connect to the database")?;
    let clock = Arc::new(DefaultClock);
    let liveness = platform_liveness();
    let queue = QueueManager::new(
        Arc::new(PostgresQueueRepository::new(pool.clone())),
        Arc::clone(&clock),
    );
    let locks = StageLockService::new(
        Arc::new(PostgresStageLockRepository::new(pool.clone())),
        Arc::clone(&clock),
        cli.polling.lock_timeout(),
    );
    let bugs = BugTracker::new(
        Arc::new(PostgresBugRepository::new(pool)),
        Arc::clone(&clock),
    );

    let recovery = RecoveryService::new(queue.clone(), locks, bugs.clone(), Arc::clone(&liveness));
    let health = HealthChecker::new(
        queue,
        Arc::new(TaskDirectoryStore::new(cli.artifacts.tasks_root.clone())),
        Arc::clone(&clock),
    )
    .with_zombie_threshold(cli.polling.zombie_threshold());
    let worker_pool = cli.agent.program.as_ref().map(|program| {
        let launcher: Arc<dyn WorkerLauncher> = Arc::new(CommandLauncher::new(
            cli.agent.kind.clone(),
            program.clone(),
            cli.agent.args.clone(),
        ));
        WorkerPool::new(
            bugs.clone(),
            vec![launcher],
            Arc::clone(&liveness),
            Arc::clone(&clock),
            PoolSettings {
                max_workers: cli.agent.max_workers,
                spawn_timeout: Duration::from_secs(cli.agent.spawn_timeout_secs),
                min_worker_age: cli.polling.min_worker_age(),
                ..PoolSettings::default()
            },
        )
    });
    if worker_pool.is_none() {
        info!("no agent program configured, bug dispatch disabled");
    }

    let mut monitor = PipelineMonitor::new(
        recovery,
        health,
        worker_pool,
        MonitorSettings {
            recovery_interval: Duration::from_secs(cli.polling.recovery_interval_secs),
            health_interval: Duration::from_secs(cli.polling.health_interval_secs),
            pool_interval: Duration::from_secs(cli.polling.pool_interval_secs),
        },
    );
    monitor.start().await;
    shutdown_signal().await;
    info!("shutdown signal received");
    monitor.stop().await;
    Ok(())
}
