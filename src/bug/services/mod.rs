//! Bug claim orchestration.

use crate::bug::{
    domain::{BugDomainError, BugId, BugRecord, BugStatus},
    ports::{BugRepository, BugRepositoryError},
};
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Service-level errors for bug operations.
#[derive(Debug, Error)]
pub enum BugTrackerError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] BugDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] BugRepositoryError),
}

/// Result type for bug service operations.
pub type BugTrackerResult<T> = Result<T, BugTrackerError>;

/// Bug claim service used by the worker pool and recovery.
pub struct BugTracker<R, C>
where
    R: BugRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
}

impl<R, C> Clone for BugTracker<R, C>
where
    R: BugRepository,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<R, C> BugTracker<R, C>
where
    R: BugRepository,
    C: Clock + Send + Sync,
{
    /// Creates a new bug tracker.
    #[must_use]
    pub const fn new(repository: Arc<R>, clock: Arc<C>) -> Self {
        Self { repository, clock }
    }

    /// Files a new open bug.
    ///
    /// # Errors
    ///
    /// Returns [`BugTrackerError::Domain`] for an empty title.
    pub async fn report(&self, title: &str) -> BugTrackerResult<BugRecord> {
        let validated = BugRecord::validate_title(title)?;
        let bug = self.repository.create(&validated, self.clock.utc()).await?;
        info!(bug_id = %bug.id(), title = bug.title(), "bug reported");
        Ok(bug)
    }

    /// Claims the oldest open bug for `worker` on behalf of process
    /// `owner_pid`.
    ///
    /// # Errors
    ///
    /// Returns [`BugTrackerError::Repository`] when persistence fails.
    pub async fn claim_next(
        &self,
        worker: &str,
        owner_pid: u32,
    ) -> BugTrackerResult<Option<BugRecord>> {
        let claimed = self
            .repository
            .claim_next(worker, owner_pid, self.clock.utc())
            .await?;
        if let Some(bug) = &claimed {
            info!(bug_id = %bug.id(), worker, owner_pid, "bug claimed");
        }
        Ok(claimed)
    }

    /// Hands a claim from `from_pid` to the agent process `pid`.
    ///
    /// Returns `false` when the bug is no longer in progress under
    /// `from_pid`.
    ///
    /// # Errors
    ///
    /// Returns [`BugTrackerError::Repository`] when persistence fails.
    pub async fn attach_worker(&self, id: BugId, from_pid: u32, pid: u32) -> BugTrackerResult<bool> {
        Ok(self
            .repository
            .attach_worker(id, from_pid, pid, self.clock.utc())
            .await?)
    }

    /// Rolls a claim back to `open` while its owner is exactly
    /// `expected_pid`.
    ///
    /// # Errors
    ///
    /// Returns [`BugTrackerError::Repository`] when persistence fails.
    pub async fn release(
        &self,
        id: BugId,
        expected_pid: Option<u32>,
        reason: &str,
    ) -> BugTrackerResult<bool> {
        let released = self
            .repository
            .release(id, expected_pid, reason, self.clock.utc())
            .await?;
        if released {
            warn!(bug_id = %id, reason, "bug claim released");
        }
        Ok(released)
    }

    /// Finishes an in-progress bug as resolved or failed.
    ///
    /// # Errors
    ///
    /// Returns [`BugTrackerError::Repository`] when persistence fails.
    pub async fn finish(&self, id: BugId, status: BugStatus, note: &str) -> BugTrackerResult<bool> {
        Ok(self
            .repository
            .finish(id, status, note, self.clock.utc())
            .await?)
    }

    /// Reopens a finished bug.
    ///
    /// # Errors
    ///
    /// Returns [`BugTrackerError::Repository`] when persistence fails.
    pub async fn reopen(&self, id: BugId, note: &str) -> BugTrackerResult<bool> {
        Ok(self.repository.reopen(id, note, self.clock.utc()).await?)
    }

    /// Finds a bug.
    ///
    /// # Errors
    ///
    /// Returns [`BugTrackerError::Repository`] when persistence fails.
    pub async fn find(&self, id: BugId) -> BugTrackerResult<Option<BugRecord>> {
        Ok(self.repository.find(id).await?)
    }

    /// Lists bugs in any of `statuses`.
    ///
    /// # Errors
    ///
    /// Returns [`BugTrackerError::Repository`] when persistence fails.
    pub async fn list_by_status(&self, statuses: &[BugStatus]) -> BugTrackerResult<Vec<BugRecord>> {
        Ok(self.repository.list_by_status(statuses).await?)
    }
}
