//! Repository port for bug records.

use crate::bug::domain::{BugId, BugRecord, BugStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for bug repository operations.
pub type BugRepositoryResult<T> = Result<T, BugRepositoryError>;

/// Bug persistence contract.
///
/// Conditional writes return `false` when the row is not in the expected
/// state.
#[async_trait]
pub trait BugRepository: Send + Sync {
    /// Stores a new open bug and returns it with its assigned identifier.
    async fn create(&self, title: &str, now: DateTime<Utc>) -> BugRepositoryResult<BugRecord>;

    /// Claims the oldest open bug for `worker`, skipping rows another
    /// transaction is claiming. `owner_pid` is recorded in the same
    /// transaction, so a claimed bug is never ownerless.
    async fn claim_next(
        &self,
        worker: &str,
        owner_pid: u32,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<Option<BugRecord>>;

    /// Hands an in-progress bug owned by `from_pid` to `pid`.
    async fn attach_worker(
        &self,
        id: BugId,
        from_pid: u32,
        pid: u32,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool>;

    /// Returns an in-progress bug to `open` while its recorded owner is
    /// exactly `expected_pid`.
    ///
    /// `None` matches only a bug without an owner, the same meaning the
    /// queue's `release_claim` gives it.
    async fn release(
        &self,
        id: BugId,
        expected_pid: Option<u32>,
        note: &str,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool>;

    /// Finishes an in-progress bug as resolved or failed.
    async fn finish(
        &self,
        id: BugId,
        status: BugStatus,
        note: &str,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool>;

    /// Reopens a resolved, closed, or failed bug.
    async fn reopen(&self, id: BugId, note: &str, now: DateTime<Utc>)
    -> BugRepositoryResult<bool>;

    /// Finds a bug by identifier.
    async fn find(&self, id: BugId) -> BugRepositoryResult<Option<BugRecord>>;

    /// Lists bugs in any of `statuses`, oldest first.
    async fn list_by_status(&self, statuses: &[BugStatus]) -> BugRepositoryResult<Vec<BugRecord>>;
}

/// Errors returned by bug repository implementations.
#[derive(Debug, Clone, Error)]
pub enum BugRepositoryError {
    /// The bug was not found.
    #[error("bug not found: {0}")]
    NotFound(BugId),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl BugRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
