//! Queue orchestration: enqueue, atomic claim, and the stage transitions.

use crate::pipeline::{
    domain::{
        QueueDomainError, QueueStatus, QueueSummary, Stage, StageAdvance, Task, TaskId,
        TaskQueueEntry, UserId,
    },
    ports::{QueueRepository, QueueRepositoryError},
};
use super::log_writer::{REOPEN_MARKER, TaskLogWriter};
use chrono::{DateTime, Duration, Utc};
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default retention of finished queue rows.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Service-level errors for queue operations.
#[derive(Debug, Error)]
pub enum QueueManagerError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] QueueDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] QueueRepositoryError),
    /// The stage log could not be written.
    #[error("failed to write stage log: {0}")]
    Log(#[from] std::io::Error),
}

/// Result type for queue service operations.
pub type QueueManagerResult<T> = Result<T, QueueManagerError>;

/// Queue orchestration service shared by workers and monitors.
pub struct QueueManager<R, C>
where
    R: QueueRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
}

impl<R, C> Clone for QueueManager<R, C>
where
    R: QueueRepository,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<R, C> QueueManager<R, C>
where
    R: QueueRepository,
    C: Clock + Send + Sync,
{
    /// Creates a new queue manager.
    #[must_use]
    pub const fn new(repository: Arc<R>, clock: Arc<C>) -> Self {
        Self { repository, clock }
    }

    /// Returns the underlying repository.
    #[must_use]
    pub const fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Submits new work: one task, its content row, and one queue row at
    /// stage `script`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Domain`] for an empty user identifier or
    /// [`QueueManagerError::Repository`] when persistence fails.
    pub async fn enqueue(
        &self,
        user_id: &str,
        scheduled_time: Option<DateTime<Utc>>,
    ) -> QueueManagerResult<TaskQueueEntry> {
        let user = UserId::new(user_id)?;
        let task = Task::new(user, scheduled_time, &*self.clock);
        let entry = TaskQueueEntry::new_waiting(task.id().clone(), task.created_at());
        self.repository.enqueue(&task, &entry).await?;
        info!(task_id = %task.id(), user_id = %task.user_id(), "task enqueued");
        Ok(entry)
    }

    /// Atomically claims the oldest waiting row of `stage`.
    ///
    /// Returns `None` when the stage has nothing to do or every candidate is
    /// being claimed by someone else.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn dequeue(
        &self,
        stage: Stage,
        worker_pid: u32,
    ) -> QueueManagerResult<Option<TaskQueueEntry>> {
        let claimed = self
            .repository
            .claim_next(stage, worker_pid, self.clock.utc())
            .await?;
        if let Some(entry) = &claimed {
            debug!(task_id = %entry.task_id(), %stage, pid = worker_pid, "task claimed");
        }
        Ok(claimed)
    }

    /// Finishes `stage` for a task and moves it to the next stage.
    ///
    /// Returns `None` when the row was no longer processing at `stage`, e.g.
    /// because recovery reconciled it in the meantime.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when the row is missing or
    /// persistence fails.
    pub async fn advance(
        &self,
        task_id: &TaskId,
        stage: Stage,
    ) -> QueueManagerResult<Option<StageAdvance>> {
        let outcome = self
            .repository
            .advance(task_id, stage, self.clock.utc())
            .await?;
        match outcome {
            Some(StageAdvance::Next(next)) => {
                info!(task_id = %task_id, from = %stage, to = %next, "stage advanced");
            }
            Some(StageAdvance::Finished) => info!(task_id = %task_id, "pipeline completed"),
            None => warn!(task_id = %task_id, %stage, "advance skipped, row no longer processing"),
        }
        Ok(outcome)
    }

    /// Records a business failure of `stage`. The row is not retried.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn fail(
        &self,
        task_id: &TaskId,
        stage: Stage,
        message: &str,
    ) -> QueueManagerResult<bool> {
        let failed = self
            .repository
            .fail(task_id, stage, message, self.clock.utc())
            .await?;
        if failed {
            warn!(task_id = %task_id, %stage, error = message, "stage failed");
        }
        Ok(failed)
    }

    /// Cancels a waiting or processing row at `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn cancel(
        &self,
        task_id: &TaskId,
        stage: Stage,
        reason: &str,
    ) -> QueueManagerResult<bool> {
        let cancelled = self
            .repository
            .cancel(task_id, stage, reason, self.clock.utc())
            .await?;
        if cancelled {
            info!(task_id = %task_id, %stage, reason, "task cancelled");
        }
        Ok(cancelled)
    }

    /// Puts a failed or cancelled task back in its stage's waiting queue.
    ///
    /// A [`REOPEN_MARKER`] line is appended to the stage log first, so the
    /// earlier attempt's errors no longer count as evidence against the row.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::NotFound`] for an unknown task,
    /// [`QueueDomainError::InvalidTransition`] when the row is not failed or
    /// cancelled, and [`QueueManagerError::Log`] when the marker cannot be
    /// written.
    pub async fn reopen(
        &self,
        task_id: &TaskId,
        logs: &TaskLogWriter<C>,
    ) -> QueueManagerResult<TaskQueueEntry> {
        let current = self
            .repository
            .find(task_id)
            .await?
            .ok_or_else(|| QueueRepositoryError::NotFound(task_id.clone()))?;
        let rejected = || QueueDomainError::InvalidTransition {
            task_id: task_id.clone(),
            stage: current.stage(),
            from: current.status(),
            to: QueueStatus::Waiting,
        };
        if !matches!(current.status(), QueueStatus::Failed | QueueStatus::Cancelled) {
            return Err(rejected().into());
        }

        logs.try_append(task_id, current.stage(), REOPEN_MARKER)
            .await?;
        if !self.repository.reopen(task_id, self.clock.utc()).await? {
            return Err(rejected().into());
        }

        let reopened = self
            .repository
            .find(task_id)
            .await?
            .ok_or_else(|| QueueRepositoryError::NotFound(task_id.clone()))?;
        info!(task_id = %task_id, stage = %reopened.stage(), "task reopened");
        Ok(reopened)
    }

    /// Returns a processing row to waiting when its recorded owner is still
    /// `expected_pid`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn release_claim(
        &self,
        task_id: &TaskId,
        stage: Stage,
        expected_pid: Option<u32>,
    ) -> QueueManagerResult<bool> {
        let released = self
            .repository
            .release_claim(task_id, stage, expected_pid)
            .await?;
        if released {
            info!(task_id = %task_id, %stage, pid = ?expected_pid, "claim released back to waiting");
        }
        Ok(released)
    }

    /// Forces a row from `expected` to `target` when it still has status
    /// `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn reconcile(
        &self,
        task_id: &TaskId,
        expected: QueueStatus,
        target: QueueStatus,
        error: Option<String>,
    ) -> QueueManagerResult<bool> {
        let applied = self
            .repository
            .reconcile(task_id, expected, target, error, self.clock.utc())
            .await?;
        if applied {
            info!(task_id = %task_id, from = %expected, to = %target, "queue row reconciled");
        }
        Ok(applied)
    }

    /// Finds the queue row of a task.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn find(&self, task_id: &TaskId) -> QueueManagerResult<Option<TaskQueueEntry>> {
        Ok(self.repository.find(task_id).await?)
    }

    /// Finds the identity record of a task.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn find_task(&self, task_id: &TaskId) -> QueueManagerResult<Option<Task>> {
        Ok(self.repository.find_task(task_id).await?)
    }

    /// Returns the mirrored content status of a task.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn content_status(&self, task_id: &TaskId) -> QueueManagerResult<Option<String>> {
        Ok(self.repository.content_status(task_id).await?)
    }

    /// Lists rows in any of `statuses`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn list_by_status(
        &self,
        statuses: &[QueueStatus],
    ) -> QueueManagerResult<Vec<TaskQueueEntry>> {
        Ok(self.repository.list_by_status(statuses).await?)
    }

    /// Counts rows per stage and status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn summary(&self) -> QueueManagerResult<QueueSummary> {
        Ok(self.repository.summary().await?)
    }

    /// Returns the number of rows ahead of a waiting task in its stage.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn position(&self, task_id: &TaskId) -> QueueManagerResult<Option<u64>> {
        Ok(self.repository.position(task_id).await?)
    }

    /// Deletes completed and failed rows finished more than `older_than`
    /// ago.
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Repository`] when persistence fails.
    pub async fn cleanup(&self, older_than: Duration) -> QueueManagerResult<u64> {
        let cutoff = self.clock.utc() - older_than;
        let deleted = self.repository.cleanup(cutoff).await?;
        if deleted > 0 {
            info!(deleted, %cutoff, "finished queue rows removed");
        }
        Ok(deleted)
    }
}
