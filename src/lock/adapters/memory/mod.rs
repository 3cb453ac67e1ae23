//! In-memory stage lock repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::lock::{
    domain::{LockHolder, StageLock},
    ports::{StageLockRepository, StageLockRepositoryError, StageLockRepositoryResult},
};
use crate::pipeline::domain::{Stage, TaskId};

/// Thread-safe in-memory stage lock table, pre-seeded with every stage.
#[derive(Debug, Clone)]
pub struct InMemoryStageLockRepository {
    locks: Arc<Mutex<BTreeMap<Stage, StageLock>>>,
}

impl Default for InMemoryStageLockRepository {
    fn default() -> Self {
        let locks = Stage::ALL
            .into_iter()
            .map(|stage| (stage, StageLock::free(stage)))
            .collect();
        Self {
            locks: Arc::new(Mutex::new(locks)),
        }
    }
}

impl InMemoryStageLockRepository {
    /// Creates a table with every stage unlocked.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> StageLockRepositoryResult<MutexGuard<'_, BTreeMap<Stage, StageLock>>> {
        self.locks.lock().map_err(|err| {
            StageLockRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }
}

#[async_trait]
impl StageLockRepository for InMemoryStageLockRepository {
    async fn acquire(
        &self,
        stage: Stage,
        task_id: &TaskId,
        worker_pid: u32,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StageLockRepositoryResult<bool> {
        let mut locks = self.guard()?;
        let lock = locks.entry(stage).or_insert_with(|| StageLock::free(stage));
        let available = lock
            .holder()
            .is_none_or(|holder| holder.locked_at < stale_before);
        if !available {
            return Ok(false);
        }
        lock.grant(LockHolder {
            task_id: task_id.clone(),
            locked_at: now,
            worker_pid: Some(worker_pid),
        });
        Ok(true)
    }

    async fn release(&self, stage: Stage, task_id: &TaskId) -> StageLockRepositoryResult<bool> {
        let mut locks = self.guard()?;
        let Some(lock) = locks
            .get_mut(&stage)
            .filter(|lock| lock.is_held_by(task_id))
        else {
            return Ok(false);
        };
        lock.clear();
        Ok(true)
    }

    async fn find(&self, stage: Stage) -> StageLockRepositoryResult<StageLock> {
        let locks = self.guard()?;
        Ok(locks
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| StageLock::free(stage)))
    }

    async fn list(&self) -> StageLockRepositoryResult<Vec<StageLock>> {
        Ok(self.guard()?.values().cloned().collect())
    }

    async fn release_expired(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StageLockRepositoryResult<Vec<StageLock>> {
        let mut locks = self.guard()?;
        let mut released = Vec::new();
        for lock in locks.values_mut() {
            if lock
                .holder()
                .is_some_and(|holder| holder.locked_at < stale_before)
            {
                released.push(lock.clone());
                lock.clear();
            }
        }
        Ok(released)
    }
}
