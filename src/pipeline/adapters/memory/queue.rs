//! In-memory queue repository for tests and single-process runs.
//!
//! Every operation holds the state lock for its whole read-modify-write, so
//! claims and conditional writes behave like the row-locked SQL statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::pipeline::{
    domain::{QueueStatus, QueueSummary, Stage, StageAdvance, Task, TaskId, TaskQueueEntry},
    ports::{QueueRepository, QueueRepositoryError, QueueRepositoryResult},
};

/// Thread-safe in-memory queue repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueueRepository {
    state: Arc<RwLock<InMemoryQueueState>>,
}

#[derive(Debug, Default)]
struct InMemoryQueueState {
    tasks: HashMap<TaskId, Task>,
    entries: HashMap<TaskId, TaskQueueEntry>,
    content: HashMap<TaskId, String>,
}

impl InMemoryQueueRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a queue row directly, bypassing the transition
    /// rules. Intended for seeding fixtures.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::Persistence`] when the lock is
    /// poisoned.
    pub fn put_entry(&self, entry: TaskQueueEntry) -> QueueRepositoryResult<()> {
        let mut state = self.write()?;
        state.entries.insert(entry.task_id().clone(), entry);
        Ok(())
    }

    /// Returns the number of queue rows held.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::Persistence`] when the lock is
    /// poisoned.
    pub fn row_count(&self) -> QueueRepositoryResult<usize> {
        Ok(self.read()?.entries.len())
    }

    fn read(&self) -> QueueRepositoryResult<RwLockReadGuard<'_, InMemoryQueueState>> {
        self.state.read().map_err(|err| {
            QueueRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }

    fn write(&self) -> QueueRepositoryResult<RwLockWriteGuard<'_, InMemoryQueueState>> {
        self.state.write().map_err(|err| {
            QueueRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }
}

impl InMemoryQueueState {
    /// Applies `mutate` to the row when it exists and `guard` accepts it.
    fn update_if<F, G>(&mut self, task_id: &TaskId, guard: G, mutate: F) -> bool
    where
        G: FnOnce(&TaskQueueEntry) -> bool,
        F: FnOnce(&mut TaskQueueEntry) -> bool,
    {
        self.entries
            .get_mut(task_id)
            .filter(|entry| guard(entry))
            .is_some_and(mutate)
    }

    fn set_content(&mut self, task_id: &TaskId, status: &str) {
        if let Some(content) = self.content.get_mut(task_id) {
            status.clone_into(content);
        }
    }
}

#[async_trait]
impl QueueRepository for InMemoryQueueRepository {
    async fn enqueue(&self, task: &Task, entry: &TaskQueueEntry) -> QueueRepositoryResult<()> {
        let mut state = self.write()?;
        if state.tasks.contains_key(task.id()) || state.entries.contains_key(entry.task_id()) {
            return Err(QueueRepositoryError::DuplicateTask(task.id().clone()));
        }
        state.tasks.insert(task.id().clone(), task.clone());
        state
            .content
            .insert(task.id().clone(), entry.stage().as_str().to_owned());
        state.entries.insert(entry.task_id().clone(), entry.clone());
        Ok(())
    }

    async fn claim_next(
        &self,
        stage: Stage,
        worker_pid: u32,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<Option<TaskQueueEntry>> {
        let mut state = self.write()?;
        let oldest = state
            .entries
            .values()
            .filter(|entry| entry.stage() == stage && entry.status() == QueueStatus::Waiting)
            .min_by(|left, right| {
                left.created_at()
                    .cmp(&right.created_at())
                    .then_with(|| left.task_id().cmp(right.task_id()))
            })
            .map(|entry| entry.task_id().clone());

        let Some(task_id) = oldest else {
            return Ok(None);
        };
        let Some(entry) = state.entries.get_mut(&task_id) else {
            return Ok(None);
        };
        if entry.claim(worker_pid, now).is_err() {
            return Ok(None);
        }
        Ok(Some(entry.clone()))
    }

    async fn advance(
        &self,
        task_id: &TaskId,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<Option<StageAdvance>> {
        let mut state = self.write()?;
        let Some(entry) = state.entries.get_mut(task_id) else {
            return Err(QueueRepositoryError::NotFound(task_id.clone()));
        };
        if !entry.is_processing_at(stage) {
            return Ok(None);
        }
        let Ok(outcome) = entry.advance(now) else {
            return Ok(None);
        };
        state.set_content(task_id, outcome.content_status());
        Ok(Some(outcome))
    }

    async fn fail(
        &self,
        task_id: &TaskId,
        stage: Stage,
        message: &str,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<bool> {
        let mut state = self.write()?;
        let failed = state.update_if(
            task_id,
            |entry| entry.is_processing_at(stage),
            |entry| entry.fail(message, now).is_ok(),
        );
        if failed {
            state.set_content(task_id, QueueStatus::Failed.as_str());
        }
        Ok(failed)
    }

    async fn cancel(
        &self,
        task_id: &TaskId,
        stage: Stage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<bool> {
        let mut state = self.write()?;
        Ok(state.update_if(
            task_id,
            |entry| entry.stage() == stage,
            |entry| entry.cancel(reason, now).is_ok(),
        ))
    }

    async fn reopen(&self, task_id: &TaskId, _now: DateTime<Utc>) -> QueueRepositoryResult<bool> {
        let mut state = self.write()?;
        let mut reopened_at = None;
        let reopened = state.update_if(
            task_id,
            |_| true,
            |entry| {
                reopened_at = Some(entry.stage());
                entry.reopen().is_ok()
            },
        );
        if let (true, Some(stage)) = (reopened, reopened_at) {
            state.set_content(task_id, stage.as_str());
        }
        Ok(reopened)
    }

    async fn release_claim(
        &self,
        task_id: &TaskId,
        stage: Stage,
        expected_pid: Option<u32>,
    ) -> QueueRepositoryResult<bool> {
        let mut state = self.write()?;
        Ok(state.update_if(
            task_id,
            |entry| entry.is_processing_at(stage) && entry.worker_pid() == expected_pid,
            |entry| entry.release_claim().is_ok(),
        ))
    }

    async fn reconcile(
        &self,
        task_id: &TaskId,
        expected: QueueStatus,
        target: QueueStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<bool> {
        let mut state = self.write()?;
        let applied = state.update_if(
            task_id,
            |entry| entry.status() == expected,
            |entry| {
                entry.reconcile_to(target, error, now);
                true
            },
        );
        if applied && target.is_terminal() {
            state.set_content(task_id, target.as_str());
        }
        Ok(applied)
    }

    async fn find(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<TaskQueueEntry>> {
        Ok(self.read()?.entries.get(task_id).cloned())
    }

    async fn find_task(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<Task>> {
        Ok(self.read()?.tasks.get(task_id).cloned())
    }

    async fn content_status(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<String>> {
        Ok(self.read()?.content.get(task_id).cloned())
    }

    async fn list_by_status(
        &self,
        statuses: &[QueueStatus],
    ) -> QueueRepositoryResult<Vec<TaskQueueEntry>> {
        let state = self.read()?;
        let mut rows: Vec<TaskQueueEntry> = state
            .entries
            .values()
            .filter(|entry| statuses.contains(&entry.status()))
            .cloned()
            .collect();
        rows.sort_by(|left, right| {
            left.created_at()
                .cmp(&right.created_at())
                .then_with(|| left.task_id().cmp(right.task_id()))
        });
        Ok(rows)
    }

    async fn summary(&self) -> QueueRepositoryResult<QueueSummary> {
        let state = self.read()?;
        let mut summary = QueueSummary::new();
        for entry in state.entries.values() {
            summary.record(entry.stage(), entry.status(), 1);
        }
        Ok(summary)
    }

    async fn position(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<u64>> {
        let state = self.read()?;
        let Some(target) = state.entries.get(task_id) else {
            return Ok(None);
        };
        if target.status() != QueueStatus::Waiting {
            return Ok(None);
        }
        let ahead = state
            .entries
            .values()
            .filter(|entry| {
                entry.stage() == target.stage()
                    && entry.status() == QueueStatus::Waiting
                    && entry.created_at() < target.created_at()
            })
            .count();
        Ok(Some(u64::try_from(ahead).unwrap_or(u64::MAX)))
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> QueueRepositoryResult<u64> {
        let mut state = self.write()?;
        let expired: Vec<TaskId> = state
            .entries
            .values()
            .filter(|entry| {
                matches!(entry.status(), QueueStatus::Completed | QueueStatus::Failed)
                    && entry.completed_at().is_some_and(|done| done < cutoff)
            })
            .map(|entry| entry.task_id().clone())
            .collect();
        for task_id in &expired {
            state.entries.remove(task_id);
        }
        Ok(u64::try_from(expired.len()).unwrap_or(u64::MAX))
    }
}
