//! Repository port for tasks, their queue rows, and mirrored content status.

use crate::pipeline::domain::{
    QueueStatus, QueueSummary, Stage, StageAdvance, Task, TaskId, TaskQueueEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for queue repository operations.
pub type QueueRepositoryResult<T> = Result<T, QueueRepositoryError>;

/// Queue persistence contract.
///
/// Every mutation touches a single queue row keyed by task identifier, except
/// [`QueueRepository::enqueue`] and [`QueueRepository::advance`] which also
/// write the task's content row in the same transaction. Conditional writes
/// return `false` (or `None`) when the row is no longer in the expected
/// state; that is not an error.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Stores a task, its content row, and its first queue row atomically.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::DuplicateTask`] when the task already
    /// exists.
    async fn enqueue(&self, task: &Task, entry: &TaskQueueEntry) -> QueueRepositoryResult<()>;

    /// Claims the oldest waiting row of `stage` for `worker_pid`.
    ///
    /// Concurrent callers never receive the same row. Returns `None` when no
    /// row is available.
    async fn claim_next(
        &self,
        stage: Stage,
        worker_pid: u32,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<Option<TaskQueueEntry>>;

    /// Finishes `stage` of a processing row and mirrors the new position into
    /// the content row.
    ///
    /// Returns `None` when the row is not processing at `stage`.
    async fn advance(
        &self,
        task_id: &TaskId,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<Option<StageAdvance>>;

    /// Marks a processing row at `stage` failed.
    async fn fail(
        &self,
        task_id: &TaskId,
        stage: Stage,
        message: &str,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<bool>;

    /// Marks a waiting or processing row at `stage` cancelled.
    async fn cancel(
        &self,
        task_id: &TaskId,
        stage: Stage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<bool>;

    /// Moves a failed or cancelled row back to waiting at its current stage.
    async fn reopen(&self, task_id: &TaskId, now: DateTime<Utc>) -> QueueRepositoryResult<bool>;

    /// Returns a processing row to waiting when it is still owned by
    /// `expected_pid` (or has no recorded owner when `expected_pid` is
    /// `None`).
    async fn release_claim(
        &self,
        task_id: &TaskId,
        stage: Stage,
        expected_pid: Option<u32>,
    ) -> QueueRepositoryResult<bool>;

    /// Compare-and-set of the row status used by health reconciliation.
    async fn reconcile(
        &self,
        task_id: &TaskId,
        expected: QueueStatus,
        target: QueueStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<bool>;

    /// Finds the queue row of a task.
    async fn find(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<TaskQueueEntry>>;

    /// Finds the identity record of a task.
    async fn find_task(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<Task>>;

    /// Returns the mirrored content status of a task.
    async fn content_status(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<String>>;

    /// Lists rows whose status is one of `statuses`, oldest first.
    async fn list_by_status(
        &self,
        statuses: &[QueueStatus],
    ) -> QueueRepositoryResult<Vec<TaskQueueEntry>>;

    /// Counts rows per stage and status.
    async fn summary(&self) -> QueueRepositoryResult<QueueSummary>;

    /// Returns how many waiting rows of the same stage were created before
    /// the task's row. `None` when the row is missing or not waiting.
    async fn position(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<u64>>;

    /// Deletes completed and failed rows finished before `cutoff`.
    async fn cleanup(&self, cutoff: DateTime<Utc>) -> QueueRepositoryResult<u64>;
}

/// Errors returned by queue repository implementations.
#[derive(Debug, Clone, Error)]
pub enum QueueRepositoryError {
    /// A task with the same identifier already exists.
    #[error("duplicate task identifier: {0}")]
    DuplicateTask(TaskId),

    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl QueueRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
