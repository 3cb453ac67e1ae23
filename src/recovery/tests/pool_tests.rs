//! Dispatch, spawn rollback, exit filtering, and dead worker cleanup.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::bug::{
    adapters::memory::InMemoryBugRepository,
    domain::{BugId, BugRecord, BugStatus},
    services::BugTracker,
};
use crate::clock::ManualClock;
use crate::recovery::{
    adapters::StaticLiveness,
    domain::{TrackedStatus, WorkerId},
    ports::{LaunchError, LaunchedWorker, WorkerLauncher},
    services::{DispatchOutcome, ExitHandling, PoolSettings, WorkerPool},
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use eyre::{Result, ensure};
use rstest::{fixture, rstest};
use tokio::sync::{Notify, oneshot};

const POOL_PID: u32 = 1;

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
    Hang,
    Gate,
    ExitImmediately,
}

struct FakeLauncher {
    behaviour: Behaviour,
    next_pid: AtomicU32,
    gate: Notify,
    liveness: StaticLiveness,
}

impl FakeLauncher {
    fn new(behaviour: Behaviour, liveness: StaticLiveness) -> Self {
        Self {
            behaviour,
            next_pid: AtomicU32::new(500),
            gate: Notify::new(),
            liveness,
        }
    }

    fn started(&self) -> LaunchedWorker {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.liveness.start(pid);
        LaunchedWorker { pid, exit: None }
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    fn kind(&self) -> &str {
        "claude-1"
    }

    async fn launch(&self, _bug: &BugRecord) -> Result<LaunchedWorker, LaunchError> {
        match self.behaviour {
            Behaviour::Succeed => Ok(self.started()),
            Behaviour::Fail => Err(LaunchError::MissingPid),
            Behaviour::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(self.started())
            }
            Behaviour::Gate => {
                self.gate.notified().await;
                Ok(self.started())
            }
            Behaviour::ExitImmediately => {
                let (sender, receiver) = oneshot::channel();
                sender.send(Some(0)).expect("receiver alive");
                Ok(LaunchedWorker {
                    exit: Some(receiver),
                    ..self.started()
                })
            }
        }
    }
}

type TestPool = WorkerPool<InMemoryBugRepository, ManualClock>;

struct Harness {
    bugs: BugTracker<InMemoryBugRepository, ManualClock>,
    liveness: StaticLiveness,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn pool(&self, behaviour: Behaviour) -> (TestPool, Arc<FakeLauncher>) {
        let launcher = Arc::new(FakeLauncher::new(behaviour, self.liveness.clone()));
        let pool = WorkerPool::new(
            self.bugs.clone(),
            vec![Arc::clone(&launcher) as Arc<dyn WorkerLauncher>],
            Arc::new(self.liveness.clone()),
            Arc::clone(&self.clock),
            PoolSettings {
                spawn_timeout: std::time::Duration::from_millis(50),
                pool_pid: POOL_PID,
                ..PoolSettings::default()
            },
        );
        (pool, launcher)
    }

    async fn bug(&self, id: BugId) -> Result<BugRecord> {
        self.bugs
            .find(id)
            .await?
            .ok_or_else(|| eyre::eyre!("bug {id} missing"))
    }
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 4, 20, 22, 0, 0)
            .single()
            .expect("valid timestamp"),
    ));
    Harness {
        bugs: BugTracker::new(Arc::new(InMemoryBugRepository::new()), Arc::clone(&clock)),
        liveness: StaticLiveness::with_running([POOL_PID]),
        clock,
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn dispatch_launches_agent_for_oldest_open_bug(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("render crash").await?;
    let (pool, _launcher) = harness.pool(Behaviour::Succeed);

    let outcome = pool.dispatch().await?;

    ensure!(
        outcome
            == DispatchOutcome::Spawned {
                worker_id: WorkerId::new(1),
                bug_id: reported.id(),
                pid: 500,
            }
    );
    let bug = harness.bug(reported.id()).await?;
    ensure!(bug.status() == BugStatus::InProgress);
    ensure!(bug.assigned_to() == Some("claude-1"));
    ensure!(bug.worker_pid() == Some(500));
    let workers = pool.workers();
    ensure!(workers.len() == 1);
    ensure!(workers.iter().all(|worker| worker.status == TrackedStatus::Running));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn dispatch_reports_no_work_and_capacity(harness: Harness) -> Result<()> {
    let (pool, _launcher) = harness.pool(Behaviour::Succeed);
    ensure!(pool.dispatch().await? == DispatchOutcome::NoWork);

    harness.bugs.report("first").await?;
    harness.bugs.report("second").await?;
    ensure!(matches!(pool.dispatch().await?, DispatchOutcome::Spawned { .. }));
    ensure!(pool.dispatch().await? == DispatchOutcome::NoLauncher);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn spawn_failures_roll_back_and_disable_the_kind(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("flaky").await?;
    let (pool, _launcher) = harness.pool(Behaviour::Fail);

    for _ in 0..3 {
        let outcome = pool.dispatch().await?;
        ensure!(matches!(outcome, DispatchOutcome::SpawnFailed { bug_id, .. } if bug_id == reported.id()));
        let bug = harness.bug(reported.id()).await?;
        ensure!(bug.status() == BugStatus::Open && bug.worker_pid().is_none());
    }
    ensure!(pool.workers().is_empty());
    ensure!(pool.is_disabled("claude-1"));
    ensure!(pool.dispatch().await? == DispatchOutcome::NoLauncher);

    harness.clock.advance(Duration::minutes(5));
    ensure!(!pool.is_disabled("claude-1"));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn slow_launch_times_out_and_releases_the_bug(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("hung launcher").await?;
    let (pool, _launcher) = harness.pool(Behaviour::Hang);

    let outcome = pool.dispatch().await?;

    ensure!(matches!(
        outcome,
        DispatchOutcome::SpawnFailed { ref reason, .. } if reason.starts_with("spawn timed out")
    ));
    ensure!(harness.bug(reported.id()).await?.status() == BugStatus::Open);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn exit_while_spawning_releases_but_running_exit_is_ignored(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("gated").await?;
    let (gated_pool, launcher) = harness.pool(Behaviour::Gate);
    let pool = Arc::new(gated_pool);

    let dispatching = tokio::spawn({
        let dispatch_pool = Arc::clone(&pool);
        async move { dispatch_pool.dispatch().await }
    });
    let mut spawning = None;
    for _ in 0..100 {
        spawning = pool.workers().first().map(|worker| (worker.id, worker.status));
        if spawning.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let (worker_id, status) = spawning.ok_or_else(|| eyre::eyre!("worker never registered"))?;
    ensure!(status == TrackedStatus::Spawning);

    ensure!(pool.handle_worker_exit(worker_id, Some(1)).await? == ExitHandling::SpawnFailed);
    ensure!(harness.bug(reported.id()).await?.status() == BugStatus::Open);
    ensure!(pool.handle_worker_exit(worker_id, Some(1)).await? == ExitHandling::Untracked);

    launcher.gate.notify_one();
    let outcome = dispatching.await??;
    ensure!(matches!(outcome, DispatchOutcome::SpawnFailed { .. }));
    ensure!(harness.bug(reported.id()).await?.status() == BugStatus::Open);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn reported_exit_of_detached_worker_is_ignored(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("detached").await?;
    let (pool, _launcher) = harness.pool(Behaviour::ExitImmediately);
    pool.dispatch().await?;

    ensure!(pool.collect_exits().await? == 1);

    ensure!(pool.workers().len() == 1);
    ensure!(harness.bug(reported.id()).await?.status() == BugStatus::InProgress);
    ensure!(pool.collect_exits().await? == 0);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn dead_workers_are_only_reaped_after_min_age(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("crashy agent").await?;
    let (pool, _launcher) = harness.pool(Behaviour::Succeed);
    pool.dispatch().await?;
    harness.liveness.kill(500);

    harness.clock.advance(Duration::seconds(29));
    ensure!(pool.cleanup_dead_workers().await? == 0);
    ensure!(pool.workers().len() == 1);

    harness.clock.advance(Duration::seconds(2));
    ensure!(pool.cleanup_dead_workers().await? == 1);
    ensure!(pool.workers().is_empty());
    let bug = harness.bug(reported.id()).await?;
    ensure!(bug.status() == BugStatus::Open && bug.worker_pid().is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn finished_bug_clears_slot_without_rollback(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("quick fix").await?;
    let (pool, _launcher) = harness.pool(Behaviour::Succeed);
    pool.dispatch().await?;
    harness
        .bugs
        .finish(reported.id(), BugStatus::Resolved, "patched")
        .await?;
    harness.clock.advance(Duration::seconds(31));

    ensure!(pool.cleanup_dead_workers().await? == 1);
    ensure!(harness.bug(reported.id()).await?.status() == BugStatus::Resolved);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn live_takeover_pid_is_adopted(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("handed over").await?;
    let (pool, _launcher) = harness.pool(Behaviour::Succeed);
    pool.dispatch().await?;
    harness.liveness.kill(500);
    harness.liveness.start(600);
    ensure!(harness.bugs.attach_worker(reported.id(), 500, 600).await?);
    harness.clock.advance(Duration::seconds(31));

    ensure!(pool.cleanup_dead_workers().await? == 0);
    ensure!(pool.workers().iter().all(|worker| worker.pid == Some(600)));
    ensure!(harness.bug(reported.id()).await?.status() == BugStatus::InProgress);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn shutdown_releases_every_tracked_bug(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("long task").await?;
    let (pool, _launcher) = harness.pool(Behaviour::Succeed);
    pool.dispatch().await?;

    ensure!(pool.shutdown().await? == 1);

    ensure!(pool.workers().is_empty());
    ensure!(harness.bug(reported.id()).await?.status() == BugStatus::Open);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn claim_records_the_pool_pid_before_launch(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("slow start").await?;
    let (gated_pool, launcher) = harness.pool(Behaviour::Gate);
    let pool = Arc::new(gated_pool);

    let dispatching = tokio::spawn({
        let dispatch_pool = Arc::clone(&pool);
        async move { dispatch_pool.dispatch().await }
    });
    let mut owner = None;
    for _ in 0..100 {
        owner = harness.bug(reported.id()).await?.worker_pid();
        if owner.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    ensure!(owner == Some(POOL_PID), "claim left the bug without an owner");

    launcher.gate.notify_one();
    ensure!(matches!(dispatching.await??, DispatchOutcome::Spawned { pid: 500, .. }));
    ensure!(harness.bug(reported.id()).await?.worker_pid() == Some(500));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn claim_taken_during_launch_is_not_tracked(harness: Harness) -> Result<()> {
    let reported = harness.bugs.report("stolen claim").await?;
    let (gated_pool, launcher) = harness.pool(Behaviour::Gate);
    let pool = Arc::new(gated_pool);

    let dispatching = tokio::spawn({
        let dispatch_pool = Arc::clone(&pool);
        async move { dispatch_pool.dispatch().await }
    });
    let mut registered = false;
    for _ in 0..100 {
        registered = !pool.workers().is_empty();
        if registered {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    ensure!(registered, "worker never registered");
    ensure!(
        harness
            .bugs
            .release(reported.id(), Some(POOL_PID), "reclaimed elsewhere")
            .await?
    );
    harness.bugs.claim_next("claude-2", 900).await?;

    launcher.gate.notify_one();
    let outcome = dispatching.await??;

    ensure!(matches!(outcome, DispatchOutcome::ClaimLost { pid: 500, .. }));
    ensure!(pool.workers().is_empty());
    let bug = harness.bug(reported.id()).await?;
    ensure!(bug.worker_pid() == Some(900));
    ensure!(bug.assigned_to() == Some("claude-2"));
    Ok(())
}
