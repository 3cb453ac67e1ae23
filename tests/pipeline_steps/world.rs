//! Shared world state for pipeline BDD scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::{Duration, TimeZone, Utc};
use reelwright::clock::ManualClock;
use reelwright::lock::{
    adapters::memory::InMemoryStageLockRepository, domain::DEFAULT_LOCK_TIMEOUT_SECS,
    services::StageLockService,
};
use reelwright::pipeline::{
    adapters::memory::InMemoryQueueRepository,
    domain::{QueueStatus, Stage, TaskId},
    services::{QueueManager, TaskLogWriter},
};
use reelwright::worker::{
    adapters::ScriptedGenerator,
    services::{PollOutcome, StageWorker, WorkerSettings},
};
use rstest::fixture;
use tempfile::TempDir;

/// PID recorded by every worker the world builds.
pub const WORKER_PID: u32 = 7070;

/// Worker type used by the BDD world.
pub type TestWorker =
    StageWorker<InMemoryQueueRepository, InMemoryStageLockRepository, ScriptedGenerator, ManualClock>;

/// Row position observed right after one worker poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSnapshot {
    /// Task the poll reported on.
    pub task_id: TaskId,
    /// Stage of the row after the poll.
    pub stage: Stage,
    /// Status of the row after the poll.
    pub status: QueueStatus,
}

/// Scenario world for pipeline behaviour tests.
pub struct PipelineWorld {
    pub queue: QueueManager<InMemoryQueueRepository, ManualClock>,
    pub locks: StageLockService<InMemoryStageLockRepository, ManualClock>,
    pub generator: Arc<ScriptedGenerator>,
    pub clock: Arc<ManualClock>,
    pub root: Utf8PathBuf,
    pub task_id: Option<TaskId>,
    pub last_outcome: Option<PollOutcome>,
    pub trail: Vec<PollSnapshot>,
    _dir: TempDir,
}

impl PipelineWorld {
    /// Creates a world over empty in-memory stores and a temporary tasks
    /// root.
    ///
    /// # Panics
    ///
    /// Panics when the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().join("tasks")).expect("utf-8 temp dir");
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 7, 4, 8, 30, 0)
                .single()
                .expect("valid timestamp"),
        ));
        Self {
            queue: QueueManager::new(Arc::new(InMemoryQueueRepository::new()), Arc::clone(&clock)),
            locks: StageLockService::new(
                Arc::new(InMemoryStageLockRepository::new()),
                Arc::clone(&clock),
                Duration::seconds(DEFAULT_LOCK_TIMEOUT_SECS),
            ),
            generator: Arc::new(ScriptedGenerator::new()),
            clock,
            root,
            task_id: None,
            last_outcome: None,
            trail: Vec::new(),
            _dir: dir,
        }
    }

    /// Builds a worker for `stage` over the world's stores.
    #[must_use]
    pub fn worker(&self, stage: Stage) -> TestWorker {
        StageWorker::new(
            self.queue.clone(),
            self.locks.clone(),
            Arc::clone(&self.generator),
            TaskLogWriter::new(self.root.clone(), Arc::clone(&self.clock)),
            WorkerSettings {
                stage,
                worker_pid: WORKER_PID,
                poll_interval: std::time::Duration::from_millis(10),
            },
        )
    }

    /// Returns the task created by the scenario.
    ///
    /// # Errors
    ///
    /// Returns an error when no task was queued yet.
    pub fn task(&self) -> Result<&TaskId, eyre::Report> {
        self.task_id
            .as_ref()
            .ok_or_else(|| eyre::eyre!("missing queued task in scenario world"))
    }
}

impl Default for PipelineWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> PipelineWorld {
    PipelineWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
