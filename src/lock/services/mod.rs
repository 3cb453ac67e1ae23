//! Lock orchestration: acquisition with timeout takeover and guaranteed
//! release around guarded work.

use crate::lock::{
    domain::StageLock,
    ports::{StageLockRepository, StageLockRepositoryError},
};
use crate::pipeline::domain::{Stage, TaskId};
use chrono::Duration;
use mockable::Clock;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Service-level errors for stage lock operations.
#[derive(Debug, Error)]
pub enum StageLockError {
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] StageLockRepositoryError),
    /// The guarded work panicked; the lock was still released.
    #[error("work under the {stage} lock panicked: {message}")]
    Panicked {
        /// Stage whose lock was held.
        stage: Stage,
        /// Panic payload, when it was a string.
        message: String,
    },
    /// The guarded work was aborted before finishing.
    #[error("work under the {0} lock was aborted")]
    Aborted(Stage),
}

/// Result type for stage lock service operations.
pub type StageLockResult<T> = Result<T, StageLockError>;

/// Outcome of [`StageLockService::run_exclusive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockedRun<T> {
    /// The lock was held by someone else; the work did not run.
    Busy,
    /// The work ran to completion under the lock.
    Completed(T),
}

/// Stage lock orchestration service.
pub struct StageLockService<R, C>
where
    R: StageLockRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
    timeout: Duration,
}

impl<R, C> Clone for StageLockService<R, C>
where
    R: StageLockRepository,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            clock: Arc::clone(&self.clock),
            timeout: self.timeout,
        }
    }
}

impl<R, C> StageLockService<R, C>
where
    R: StageLockRepository + 'static,
    C: Clock + Send + Sync,
{
    /// Creates a service that treats locks older than `timeout` as
    /// abandoned.
    #[must_use]
    pub const fn new(repository: Arc<R>, clock: Arc<C>, timeout: Duration) -> Self {
        Self {
            repository,
            clock,
            timeout,
        }
    }

    /// Returns the abandonment timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Tries to take the lock of `stage` for `task_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StageLockError::Repository`] when persistence fails.
    pub async fn acquire(
        &self,
        stage: Stage,
        task_id: &TaskId,
        worker_pid: u32,
    ) -> StageLockResult<bool> {
        let now = self.clock.utc();
        let previous = self.repository.find(stage).await?;
        let acquired = self
            .repository
            .acquire(stage, task_id, worker_pid, now, now - self.timeout)
            .await?;
        if acquired {
            if let Some(stale) = previous.holder() {
                warn!(
                    %stage,
                    task_id = %task_id,
                    previous = %stale.task_id,
                    locked_at = %stale.locked_at,
                    "abandoned stage lock taken over"
                );
            }
            debug!(%stage, task_id = %task_id, pid = worker_pid, "stage lock acquired");
        }
        Ok(acquired)
    }

    /// Releases the lock of `stage` if `task_id` still holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StageLockError::Repository`] when persistence fails.
    pub async fn release(&self, stage: Stage, task_id: &TaskId) -> StageLockResult<bool> {
        let released = self.repository.release(stage, task_id).await?;
        if released {
            debug!(%stage, task_id = %task_id, "stage lock released");
        }
        Ok(released)
    }

    /// Returns the lock row of `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`StageLockError::Repository`] when persistence fails.
    pub async fn find(&self, stage: Stage) -> StageLockResult<StageLock> {
        Ok(self.repository.find(stage).await?)
    }

    /// Returns every stage's lock row.
    ///
    /// # Errors
    ///
    /// Returns [`StageLockError::Repository`] when persistence fails.
    pub async fn list(&self) -> StageLockResult<Vec<StageLock>> {
        Ok(self.repository.list().await?)
    }

    /// Clears every lock older than the timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StageLockError::Repository`] when persistence fails.
    pub async fn release_expired(&self) -> StageLockResult<Vec<StageLock>> {
        let stale_before = self.clock.utc() - self.timeout;
        let released = self.repository.release_expired(stale_before).await?;
        for lock in &released {
            if let Some(holder) = lock.holder() {
                warn!(
                    stage = %lock.stage(),
                    task_id = %holder.task_id,
                    locked_at = %holder.locked_at,
                    "expired stage lock released"
                );
            }
        }
        Ok(released)
    }

    /// Runs `work` while holding the lock of `stage`.
    ///
    /// The work runs in its own task so that a panic is observed here rather
    /// than unwinding past the release. The lock is released on every path.
    ///
    /// # Errors
    ///
    /// Returns [`StageLockError::Repository`] when acquisition fails, and
    /// [`StageLockError::Panicked`] or [`StageLockError::Aborted`] when the
    /// work did not finish normally.
    pub async fn run_exclusive<Fut, T>(
        &self,
        stage: Stage,
        task_id: &TaskId,
        worker_pid: u32,
        work: Fut,
    ) -> StageLockResult<LockedRun<T>>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.acquire(stage, task_id, worker_pid).await? {
            return Ok(LockedRun::Busy);
        }

        let joined = tokio::spawn(work).await;

        if let Err(err) = self.release(stage, task_id).await {
            error!(%stage, task_id = %task_id, error = %err, "failed to release stage lock");
        }

        match joined {
            Ok(value) => Ok(LockedRun::Completed(value)),
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|text| (*text).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                Err(StageLockError::Panicked { stage, message })
            }
            Err(_) => Err(StageLockError::Aborted(stage)),
        }
    }
}
