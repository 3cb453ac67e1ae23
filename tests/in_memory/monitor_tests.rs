//! Lifecycle of the pipeline monitor over in-memory stores.

use super::helpers::{LIVE_PID, Stack, stack};
use async_trait::async_trait;
use eyre::{Result, ensure};
use reelwright::bug::{
    adapters::memory::InMemoryBugRepository,
    domain::{BugId, BugRecord, BugStatus},
};
use reelwright::clock::ManualClock;
use reelwright::health::{adapters::InMemoryArtifactStore, services::HealthChecker};
use reelwright::lock::adapters::memory::InMemoryStageLockRepository;
use reelwright::monitor::{MonitorSettings, PipelineMonitor};
use reelwright::pipeline::{
    adapters::memory::InMemoryQueueRepository,
    domain::{QueueStatus, Stage, TaskId},
};
use reelwright::recovery::{
    adapters::StaticLiveness,
    domain::PassCount,
    ports::{LaunchError, LaunchedWorker, WorkerLauncher},
    services::{PoolSettings, RecoveryService, WorkerPool},
};
use rstest::rstest;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const AGENT_PID: u32 = 4100;

type TestMonitor = PipelineMonitor<
    InMemoryQueueRepository,
    InMemoryStageLockRepository,
    InMemoryBugRepository,
    InMemoryArtifactStore,
    ManualClock,
>;

struct LiveAgent {
    liveness: StaticLiveness,
}

#[async_trait]
impl WorkerLauncher for LiveAgent {
    fn kind(&self) -> &str {
        "agent"
    }

    async fn launch(&self, _bug: &BugRecord) -> Result<LaunchedWorker, LaunchError> {
        self.liveness.start(AGENT_PID);
        Ok(LaunchedWorker {
            pid: AGENT_PID,
            exit: None,
        })
    }
}

fn quiet_settings() -> MonitorSettings {
    MonitorSettings {
        recovery_interval: Duration::from_secs(3600),
        health_interval: Duration::from_secs(3600),
        pool_interval: Duration::from_secs(3600),
    }
}

fn monitor(
    stack: &Stack,
    artifacts: &InMemoryArtifactStore,
    with_pool: bool,
    settings: MonitorSettings,
) -> TestMonitor {
    let recovery = RecoveryService::new(
        stack.queue.clone(),
        stack.locks.clone(),
        stack.bugs.clone(),
        Arc::new(stack.liveness.clone()),
    );
    let health = HealthChecker::new(
        stack.queue.clone(),
        Arc::new(artifacts.clone()),
        Arc::clone(&stack.clock),
    );
    let pool = with_pool.then(|| {
        let launcher: Arc<dyn WorkerLauncher> = Arc::new(LiveAgent {
            liveness: stack.liveness.clone(),
        });
        WorkerPool::new(
            stack.bugs.clone(),
            vec![launcher],
            Arc::new(stack.liveness.clone()),
            Arc::clone(&stack.clock),
            PoolSettings {
                pool_pid: LIVE_PID,
                ..PoolSettings::default()
            },
        )
    });
    PipelineMonitor::new(recovery, health, pool, settings)
}

async fn eventually<F, Fut>(mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for _ in 0..200 {
        if condition().await? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(eyre::eyre!("condition not reached in time"))
}

async fn status_of(stack: &Stack, task_id: &TaskId) -> Result<QueueStatus> {
    Ok(stack
        .queue
        .find(task_id)
        .await?
        .ok_or_else(|| eyre::eyre!("row {task_id} missing"))?
        .status())
}

async fn find_bug(stack: &Stack, id: BugId) -> Result<BugRecord> {
    stack
        .bugs
        .find(id)
        .await?
        .ok_or_else(|| eyre::eyre!("bug {id} missing"))
}

async fn bug_status(stack: &Stack, id: BugId) -> Result<BugStatus> {
    Ok(find_bug(stack, id).await?.status())
}

async fn agent_pid(stack: &Stack, id: BugId) -> Result<Option<u32>> {
    Ok(find_bug(stack, id).await?.worker_pid())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn start_recovers_rows_of_dead_workers(stack: Stack) -> Result<()> {
    let row = stack.queue.enqueue("creator", None).await?;
    stack.queue.dequeue(Stage::Script, 31337).await?;
    let mut monitor = monitor(&stack, &InMemoryArtifactStore::new(), false, quiet_settings());

    let report = monitor
        .start()
        .await
        .ok_or_else(|| eyre::eyre!("startup recovery did not report"))?;

    ensure!(monitor.is_running());
    ensure!(report.stuck_tasks == PassCount::Known(1));
    ensure!(report.is_complete());
    ensure!(status_of(&stack, row.task_id()).await? == QueueStatus::Waiting);
    ensure!(monitor.start().await.is_none(), "second start must be refused");
    monitor.stop().await;
    ensure!(!monitor.is_running());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn periodic_health_pass_repairs_finished_rows(stack: Stack) -> Result<()> {
    let row = stack.queue.enqueue("creator", None).await?;
    stack.queue.dequeue(Stage::Script, LIVE_PID).await?;
    let artifacts = InMemoryArtifactStore::new();
    artifacts.write(row.task_id(), "final.mp4", "");
    let mut monitor = monitor(
        &stack,
        &artifacts,
        false,
        MonitorSettings {
            health_interval: Duration::from_millis(20),
            ..quiet_settings()
        },
    );

    monitor.start().await;
    ensure!(status_of(&stack, row.task_id()).await? == QueueStatus::Processing);
    let (shared, task_id) = (&stack, row.task_id());
    eventually(move || async move {
        Ok(status_of(shared, task_id).await? == QueueStatus::Completed)
    })
    .await?;
    monitor.stop().await;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stop_releases_bugs_held_by_pool_workers(stack: Stack) -> Result<()> {
    let bug = stack.bugs.report("render crash on scene 4").await?;
    let mut monitor = monitor(
        &stack,
        &InMemoryArtifactStore::new(),
        true,
        MonitorSettings {
            pool_interval: Duration::from_millis(20),
            ..quiet_settings()
        },
    );

    monitor.start().await;
    let (shared, id) = (&stack, bug.id());
    eventually(move || async move { Ok(agent_pid(shared, id).await? == Some(AGENT_PID)) }).await?;
    ensure!(bug_status(&stack, bug.id()).await? == BugStatus::InProgress);
    ensure!(monitor.pool().is_some_and(|pool| pool.workers().len() == 1));

    monitor.stop().await;

    ensure!(bug_status(&stack, bug.id()).await? == BugStatus::Open);
    ensure!(monitor.pool().is_some_and(|pool| pool.workers().is_empty()));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stop_without_start_is_a_no_op(stack: Stack) -> Result<()> {
    let mut monitor = monitor(&stack, &InMemoryArtifactStore::new(), true, quiet_settings());

    monitor.stop().await;

    ensure!(!monitor.is_running());
    Ok(())
}
