//! Polling loop of a single-stage worker.

use crate::lock::{
    ports::StageLockRepository,
    services::{LockedRun, StageLockError, StageLockService},
};
use crate::pipeline::{
    domain::{Stage, StageAdvance, TaskId, TaskQueueEntry},
    ports::QueueRepository,
    services::{CLAIM_MARKER, QueueManager, QueueManagerError, TaskLogWriter},
};
use crate::worker::{
    domain::{GeneratorOutput, OutputLine, OutputStream, StageJob},
    ports::{GeneratorError, StageGenerator},
};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default delay between polls of an idle worker.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Error recorded on a row when the worker stops mid-run.
pub const SHUTDOWN_REASON: &str = "worker shutdown";

/// Errors that interrupt a single poll.
#[derive(Debug, Error)]
pub enum StageWorkerError {
    /// Queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueManagerError),
    /// Stage lock operation failed.
    #[error(transparent)]
    Lock(#[from] StageLockError),
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was waiting at the stage.
    Idle,
    /// A row was claimed but the stage lock was held; the claim was handed
    /// back.
    LockBusy(TaskId),
    /// The stage succeeded and the row moved on.
    Advanced {
        /// Task that advanced.
        task_id: TaskId,
        /// Where the task went.
        advance: StageAdvance,
    },
    /// The stage failed; the row is `failed` and will not be retried.
    Failed {
        /// Task that failed.
        task_id: TaskId,
        /// Recorded error message.
        error: String,
    },
    /// The run was interrupted by shutdown and the row cancelled.
    Cancelled(TaskId),
    /// The run finished but the row had already been reconciled elsewhere.
    Skipped(TaskId),
}

/// Static settings of one worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Stage this worker serves.
    pub stage: Stage,
    /// PID recorded on claims and locks.
    pub worker_pid: u32,
    /// Delay between polls while idle.
    pub poll_interval: Duration,
}

impl WorkerSettings {
    /// Settings for `stage` using the current process id.
    #[must_use]
    pub fn for_current_process(stage: Stage) -> Self {
        Self {
            stage,
            worker_pid: std::process::id(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

type RunResult = Result<GeneratorOutput, GeneratorError>;

/// Claims tasks of one stage and drives its generator under the stage lock.
pub struct StageWorker<Q, L, G, C>
where
    Q: QueueRepository,
    L: StageLockRepository,
    G: StageGenerator,
    C: Clock + Send + Sync,
{
    queue: QueueManager<Q, C>,
    locks: StageLockService<L, C>,
    generator: Arc<G>,
    logs: Arc<TaskLogWriter<C>>,
    settings: WorkerSettings,
}

impl<Q, L, G, C> StageWorker<Q, L, G, C>
where
    Q: QueueRepository,
    L: StageLockRepository + 'static,
    G: StageGenerator + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a worker.
    #[must_use]
    pub fn new(
        queue: QueueManager<Q, C>,
        locks: StageLockService<L, C>,
        generator: Arc<G>,
        logs: TaskLogWriter<C>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            locks,
            generator,
            logs: Arc::new(logs),
            settings,
        }
    }

    /// Returns the worker settings.
    #[must_use]
    pub const fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Polls until `shutdown` fires.
    ///
    /// Poll errors are logged and retried after the poll interval; a busy
    /// worker polls again immediately after finishing a task.
    pub async fn run(&self, shutdown: CancellationToken) {
        let stage = self.settings.stage;
        info!(%stage, pid = self.settings.worker_pid, "stage worker started");
        while !shutdown.is_cancelled() {
            let pause = match self.poll_once(&shutdown).await {
                Ok(PollOutcome::Idle | PollOutcome::LockBusy(_)) => true,
                Ok(_) => false,
                Err(err) => {
                    error!(%stage, error = %err, "poll failed");
                    true
                }
            };
            if pause {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }
        info!(%stage, pid = self.settings.worker_pid, "stage worker stopped");
    }

    /// Claims and processes at most one task.
    ///
    /// # Errors
    ///
    /// Returns [`StageWorkerError`] when the queue or lock store fails. A
    /// failing generator is not an error; it yields
    /// [`PollOutcome::Failed`].
    pub async fn poll_once(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<PollOutcome, StageWorkerError> {
        let WorkerSettings {
            stage, worker_pid, ..
        } = self.settings;
        let Some(entry) = self.queue.dequeue(stage, worker_pid).await? else {
            return Ok(PollOutcome::Idle);
        };
        let task_id = entry.task_id().clone();
        let job = match self.job_for(&entry).await {
            Ok(job) => job,
            Err(err) => {
                warn!(task_id = %task_id, %stage, error = %err, "task lookup failed, releasing claim");
                self.queue
                    .release_claim(&task_id, stage, Some(worker_pid))
                    .await?;
                return Err(err);
            }
        };
        self.logs
            .append(&task_id, stage, &format!("{CLAIM_MARKER} {worker_pid}"))
            .await;

        let work = run_generator(
            Arc::clone(&self.generator),
            Arc::clone(&self.logs),
            job,
            shutdown.child_token(),
        );
        let run = match self
            .locks
            .run_exclusive(stage, &task_id, worker_pid, work)
            .await
        {
            Ok(run) => run,
            Err(StageLockError::Repository(err)) => {
                self.queue
                    .release_claim(&task_id, stage, Some(worker_pid))
                    .await?;
                return Err(StageLockError::Repository(err).into());
            }
            Err(err) => return self.record_failure(&task_id, &err.to_string()).await,
        };

        self.settle(task_id, run).await
    }

    async fn settle(
        &self,
        task_id: TaskId,
        run: LockedRun<RunResult>,
    ) -> Result<PollOutcome, StageWorkerError> {
        let WorkerSettings {
            stage, worker_pid, ..
        } = self.settings;
        match run {
            LockedRun::Busy => {
                debug!(%stage, task_id = %task_id, "stage lock busy, releasing claim");
                self.queue
                    .release_claim(&task_id, stage, Some(worker_pid))
                    .await?;
                Ok(PollOutcome::LockBusy(task_id))
            }
            LockedRun::Completed(Ok(output)) if output.succeeded() => {
                self.logs.append(&task_id, stage, "stage completed").await;
                let advanced = self.queue.advance(&task_id, stage).await?;
                Ok(advanced.map_or_else(
                    || PollOutcome::Skipped(task_id.clone()),
                    |advance| PollOutcome::Advanced {
                        task_id: task_id.clone(),
                        advance,
                    },
                ))
            }
            LockedRun::Completed(Ok(output)) => {
                self.record_failure(&task_id, &output.failure_message()).await
            }
            LockedRun::Completed(Err(GeneratorError::Cancelled)) => {
                self.logs.append(&task_id, stage, SHUTDOWN_REASON).await;
                let cancelled = self.queue.cancel(&task_id, stage, SHUTDOWN_REASON).await?;
                Ok(if cancelled {
                    PollOutcome::Cancelled(task_id)
                } else {
                    PollOutcome::Skipped(task_id)
                })
            }
            LockedRun::Completed(Err(err)) => self.record_failure(&task_id, &err.to_string()).await,
        }
    }

    async fn job_for(&self, entry: &TaskQueueEntry) -> Result<StageJob, StageWorkerError> {
        let task_id = entry.task_id();
        let task = self.queue.find_task(task_id).await?;
        if task.is_none() {
            warn!(task_id = %task_id, "queue row has no task record");
        }
        Ok(StageJob {
            task_id: task_id.clone(),
            user_id: task.map(|found| found.user_id().clone()),
            stage: self.settings.stage,
            task_dir: self.logs.task_dir(task_id),
        })
    }

    async fn record_failure(
        &self,
        task_id: &TaskId,
        message: &str,
    ) -> Result<PollOutcome, StageWorkerError> {
        let stage = self.settings.stage;
        self.logs
            .append(task_id, stage, &format!("stage failed: {message}"))
            .await;
        let failed = self.queue.fail(task_id, stage, message).await?;
        Ok(if failed {
            PollOutcome::Failed {
                task_id: task_id.clone(),
                error: message.to_owned(),
            }
        } else {
            PollOutcome::Skipped(task_id.clone())
        })
    }
}

/// Runs the generator while copying its output lines into the stage log.
async fn run_generator<G, C>(
    generator: Arc<G>,
    logs: Arc<TaskLogWriter<C>>,
    job: StageJob,
    cancel: CancellationToken,
) -> RunResult
where
    G: StageGenerator,
    C: Clock + Send + Sync + 'static,
{
    let (sender, mut receiver) = mpsc::unbounded_channel::<OutputLine>();
    let task_id = job.task_id.clone();
    let stage = job.stage;
    let drain = tokio::spawn(async move {
        while let Some(line) = receiver.recv().await {
            let text = match line.stream {
                OutputStream::Stdout => line.text,
                OutputStream::Stderr => format!("[stderr] {}", line.text),
            };
            logs.append(&task_id, stage, &text).await;
        }
    });

    let result = generator.run(&job, sender, cancel).await;
    if let Err(err) = drain.await {
        warn!(task_id = %job.task_id, %stage, error = %err, "stage log drain ended abnormally");
    }
    result
}
