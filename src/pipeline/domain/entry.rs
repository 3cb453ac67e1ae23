//! Queue entry aggregate: a task's current position in the pipeline.

use super::{QueueDomainError, QueueStatus, Stage, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of finishing a stage successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAdvance {
    /// The row moved to the given stage and is waiting again.
    Next(Stage),
    /// The final stage finished; the row is completed.
    Finished,
}

impl StageAdvance {
    /// Returns the value mirrored into `content.status` for this outcome.
    #[must_use]
    pub const fn content_status(self) -> &'static str {
        match self {
            Self::Next(stage) => stage.as_str(),
            Self::Finished => "completed",
        }
    }
}

/// The single live queue row of a task.
///
/// Advancing to the next stage mutates `stage` and resets `status` on this
/// same row; a task never owns more than one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueueEntry {
    task_id: TaskId,
    stage: Stage,
    status: QueueStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    worker_pid: Option<u32>,
}

/// Parameter object for reconstructing a persisted queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedQueueEntry {
    /// Persisted task identifier.
    pub task_id: TaskId,
    /// Persisted stage.
    pub stage: Stage,
    /// Persisted status.
    pub status: QueueStatus,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted claim timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Persisted completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Persisted error message.
    pub error: Option<String>,
    /// Persisted owner process.
    pub worker_pid: Option<u32>,
}

impl TaskQueueEntry {
    /// Creates the first entry of a task: stage `script`, status `waiting`.
    #[must_use]
    pub const fn new_waiting(task_id: TaskId, created_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            stage: Stage::Script,
            status: QueueStatus::Waiting,
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
            worker_pid: None,
        }
    }

    /// Reconstructs an entry from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedQueueEntry) -> Self {
        Self {
            task_id: data.task_id,
            stage: data.stage,
            status: data.status,
            created_at: data.created_at,
            started_at: data.started_at,
            completed_at: data.completed_at,
            error: data.error,
            worker_pid: data.worker_pid,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Returns the current stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> QueueStatus {
        self.status
    }

    /// Returns the creation timestamp; claims are ordered by it.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the current stage was claimed.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the row reached a terminal status.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the recorded error message.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns the PID of the worker that claimed the row.
    #[must_use]
    pub const fn worker_pid(&self) -> Option<u32> {
        self.worker_pid
    }

    /// Returns whether the row is `processing` at `stage`.
    #[must_use]
    pub fn is_processing_at(&self, stage: Stage) -> bool {
        self.status == QueueStatus::Processing && self.stage == stage
    }

    /// Claims a waiting row for `worker_pid`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidTransition`] unless the row is
    /// waiting.
    pub fn claim(&mut self, worker_pid: u32, now: DateTime<Utc>) -> Result<(), QueueDomainError> {
        self.ensure_status(&[QueueStatus::Waiting], QueueStatus::Processing)?;
        self.status = QueueStatus::Processing;
        self.started_at = Some(now);
        self.worker_pid = Some(worker_pid);
        Ok(())
    }

    /// Finishes the current stage and moves to the next one, or completes
    /// the row after the final stage.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidTransition`] unless the row is
    /// processing.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<StageAdvance, QueueDomainError> {
        let outcome = self.stage.next().map_or(StageAdvance::Finished, StageAdvance::Next);
        let target = match outcome {
            StageAdvance::Next(_) => QueueStatus::Waiting,
            StageAdvance::Finished => QueueStatus::Completed,
        };
        self.ensure_status(&[QueueStatus::Processing], target)?;

        match outcome {
            StageAdvance::Next(stage) => {
                self.stage = stage;
                self.status = QueueStatus::Waiting;
                self.started_at = None;
            }
            StageAdvance::Finished => {
                self.status = QueueStatus::Completed;
                self.completed_at = Some(now);
            }
        }
        self.error = None;
        self.worker_pid = None;
        Ok(outcome)
    }

    /// Records a business failure of the current stage.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidTransition`] unless the row is
    /// processing.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueDomainError> {
        self.ensure_status(&[QueueStatus::Processing], QueueStatus::Failed)?;
        self.status = QueueStatus::Failed;
        self.completed_at = Some(now);
        self.error = Some(message.into());
        self.worker_pid = None;
        Ok(())
    }

    /// Cancels a waiting or processing row.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidTransition`] when the row is
    /// already terminal.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueDomainError> {
        self.ensure_status(
            &[QueueStatus::Waiting, QueueStatus::Processing],
            QueueStatus::Cancelled,
        )?;
        self.status = QueueStatus::Cancelled;
        self.completed_at = Some(now);
        self.error = Some(reason.into());
        self.worker_pid = None;
        Ok(())
    }

    /// Moves a failed or cancelled row back to waiting at its current stage.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidTransition`] unless the row is
    /// failed or cancelled.
    pub fn reopen(&mut self) -> Result<(), QueueDomainError> {
        self.ensure_status(
            &[QueueStatus::Failed, QueueStatus::Cancelled],
            QueueStatus::Waiting,
        )?;
        self.reset_to_waiting();
        Ok(())
    }

    /// Returns a processing row whose owner is gone to the pre-claim state.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidTransition`] unless the row is
    /// processing.
    pub fn release_claim(&mut self) -> Result<(), QueueDomainError> {
        self.ensure_status(&[QueueStatus::Processing], QueueStatus::Waiting)?;
        self.reset_to_waiting();
        Ok(())
    }

    /// Forces the row to a status derived from external evidence.
    ///
    /// Used by health reconciliation; performs no transition validation.
    pub fn reconcile_to(
        &mut self,
        status: QueueStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.completed_at = Some(now);
        self.error = error;
        self.worker_pid = None;
    }

    fn reset_to_waiting(&mut self) {
        self.status = QueueStatus::Waiting;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
        self.worker_pid = None;
    }

    fn ensure_status(
        &self,
        allowed: &[QueueStatus],
        target: QueueStatus,
    ) -> Result<(), QueueDomainError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(QueueDomainError::InvalidTransition {
            task_id: self.task_id.clone(),
            stage: self.stage,
            from: self.status,
            to: target,
        })
    }
}
