//! Repository port for stage lock rows.

use crate::lock::domain::StageLock;
use crate::pipeline::domain::{Stage, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for stage lock repository operations.
pub type StageLockRepositoryResult<T> = Result<T, StageLockRepositoryError>;

/// Stage lock persistence contract.
///
/// Each mutation is a single conditional update of one stage row.
#[async_trait]
pub trait StageLockRepository: Send + Sync {
    /// Grants the lock of `stage` to `task_id` when it is free or was taken
    /// before `stale_before`. Returns whether the lock was granted.
    async fn acquire(
        &self,
        stage: Stage,
        task_id: &TaskId,
        worker_pid: u32,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StageLockRepositoryResult<bool>;

    /// Clears the lock of `stage` when `task_id` still holds it.
    async fn release(&self, stage: Stage, task_id: &TaskId) -> StageLockRepositoryResult<bool>;

    /// Returns the lock row of `stage`.
    async fn find(&self, stage: Stage) -> StageLockRepositoryResult<StageLock>;

    /// Returns every stage's lock row in pipeline order.
    async fn list(&self) -> StageLockRepositoryResult<Vec<StageLock>>;

    /// Clears every lock taken before `stale_before` and returns the locks as
    /// they were before clearing.
    async fn release_expired(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StageLockRepositoryResult<Vec<StageLock>>;
}

/// Errors returned by stage lock repository implementations.
#[derive(Debug, Clone, Error)]
pub enum StageLockRepositoryError {
    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl StageLockRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
