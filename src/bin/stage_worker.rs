//! Runs one stage worker against the shared store.
//!
//! ```text
//! stage-worker --stage video --database-url postgres://... --generators-file generators.json
//! ```
//!
//! SIGINT or SIGTERM cancels the task in flight, kills its generator, and
//! exits once the row is marked cancelled.

use clap::Parser;
use eyre::{Result, WrapErr};
use mockable::DefaultClock;
use reelwright::config::{
    ArtifactConfig, DatabaseConfig, GeneratorConfig, PollingConfig, load_dotenv,
};
use reelwright::lock::{adapters::postgres::PostgresStageLockRepository, services::StageLockService};
use reelwright::persistence::build_pool;
use reelwright::pipeline::{
    adapters::postgres::PostgresQueueRepository,
    domain::Stage,
    services::{QueueManager, TaskLogWriter},
};
use reelwright::signal::cancel_on_shutdown_signal;
use reelwright::telemetry::init_tracing;
use reelwright::worker::{
    adapters::SubprocessGenerator,
    services::{StageWorker, WorkerSettings},
};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "stage-worker", version, about = "Pipeline stage worker")]
struct Cli {
    /// Stage served by this process.
    #[arg(long, env = "STAGE")]
    stage: Stage,

    #[command(flatten)]
    database: DatabaseConfig,

    #[command(flatten)]
    polling: PollingConfig,

    #[command(flatten)]
    artifacts: ArtifactConfig,

    #[command(flatten)]
    generators: GeneratorConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv().wrap_err("failed to load .env")?;
    let cli = Cli::parse();
    init_tracing()?;

    let pool = build_pool(&cli.database.url, cli.database.pool_size)
        .wrap_err("failed to connect to the database")?;
    let clock = Arc::new(DefaultClock);
    let queue = QueueManager::new(
        Arc::new(PostgresQueueRepository::new(pool.clone())),
        Arc::clone(&clock),
    );
    let locks = StageLockService::new(
        Arc::new(PostgresStageLockRepository::new(pool)),
        Arc::clone(&clock),
        cli.polling.lock_timeout(),
    );
    let generator = Arc::new(SubprocessGenerator::new(cli.generators.load()?));
    let logs = TaskLogWriter::new(cli.artifacts.tasks_root.clone(), clock);
    let settings = WorkerSettings {
        poll_interval: cli.polling.poll_interval(),
        ..WorkerSettings::for_current_process(cli.stage)
    };
    let worker = StageWorker::new(queue, locks, generator, logs, settings);

    worker.run(cancel_on_shutdown_signal()).await;
    Ok(())
}
