//! Liveness-based reconciliation of claims and locks.

use crate::bug::{
    domain::BugStatus,
    ports::BugRepository,
    services::{BugTracker, BugTrackerError},
};
use crate::lock::{
    ports::StageLockRepository,
    services::{StageLockError, StageLockService},
};
use crate::pipeline::{
    domain::QueueStatus,
    ports::QueueRepository,
    services::{QueueManager, QueueManagerError},
};
use crate::recovery::{
    domain::{PassCount, RecoveryReport},
    ports::ProcessLiveness,
};
use mockable::Clock;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Note recorded on a bug returned to the open pool.
pub const STUCK_BUG_NOTE: &str = "recovered: owner process not running";

/// Errors from a single recovery step.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Queue store failed.
    #[error(transparent)]
    Queue(#[from] QueueManagerError),
    /// Lock store failed.
    #[error(transparent)]
    Lock(#[from] StageLockError),
    /// Bug store failed.
    #[error(transparent)]
    Bug(#[from] BugTrackerError),
}

/// Reconciles stored ownership against running processes.
pub struct RecoveryService<Q, L, B, C>
where
    Q: QueueRepository,
    L: StageLockRepository,
    B: BugRepository,
    C: Clock + Send + Sync,
{
    queue: QueueManager<Q, C>,
    locks: StageLockService<L, C>,
    bugs: BugTracker<B, C>,
    liveness: Arc<dyn ProcessLiveness>,
}

impl<Q, L, B, C> RecoveryService<Q, L, B, C>
where
    Q: QueueRepository,
    L: StageLockRepository + 'static,
    B: BugRepository,
    C: Clock + Send + Sync,
{
    /// Creates a recovery service.
    #[must_use]
    pub fn new(
        queue: QueueManager<Q, C>,
        locks: StageLockService<L, C>,
        bugs: BugTracker<B, C>,
        liveness: Arc<dyn ProcessLiveness>,
    ) -> Self {
        Self {
            queue,
            locks,
            bugs,
            liveness,
        }
    }

    /// Returns whether `pid` is running.
    #[must_use]
    pub fn is_process_running(&self, pid: u32) -> bool {
        self.liveness.is_running(pid)
    }

    fn owner_alive(&self, pid: Option<u32>) -> bool {
        pid.is_some_and(|owner| self.is_process_running(owner))
    }

    /// Returns processing queue rows whose owner is absent or dead to
    /// waiting.
    ///
    /// Each reset is conditional on the row still being owned by the PID
    /// that was found dead, so repeated runs change nothing further.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Queue`] when the store fails.
    pub async fn recover_stuck_tasks(&self) -> Result<u64, RecoveryError> {
        let rows = self.queue.list_by_status(&[QueueStatus::Processing]).await?;
        let mut recovered = 0;
        for row in rows {
            if self.owner_alive(row.worker_pid()) {
                continue;
            }
            if self
                .queue
                .release_claim(row.task_id(), row.stage(), row.worker_pid())
                .await?
            {
                warn!(
                    task_id = %row.task_id(),
                    stage = %row.stage(),
                    pid = ?row.worker_pid(),
                    "stuck task returned to waiting"
                );
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Returns in-progress bugs whose owner is absent or dead to open.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Bug`] when the store fails.
    pub async fn recover_stuck_bugs(&self) -> Result<u64, RecoveryError> {
        let bugs = self.bugs.list_by_status(&[BugStatus::InProgress]).await?;
        let mut recovered = 0;
        for bug in bugs {
            if self.owner_alive(bug.worker_pid()) {
                continue;
            }
            if self
                .bugs
                .release(bug.id(), bug.worker_pid(), STUCK_BUG_NOTE)
                .await?
            {
                warn!(bug_id = %bug.id(), pid = ?bug.worker_pid(), "stuck bug returned to open");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Clears stage locks that expired or whose holder process is dead.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Lock`] when the store fails.
    pub async fn release_orphaned_locks(&self) -> Result<u64, RecoveryError> {
        let expired = self.locks.release_expired().await?;
        let mut released = u64::try_from(expired.len()).unwrap_or(u64::MAX);
        for lock in self.locks.list().await? {
            let Some(holder) = lock.holder() else {
                continue;
            };
            if self.owner_alive(holder.worker_pid) {
                continue;
            }
            if self.locks.release(lock.stage(), &holder.task_id).await? {
                warn!(
                    stage = %lock.stage(),
                    task_id = %holder.task_id,
                    pid = ?holder.worker_pid,
                    "orphaned stage lock released"
                );
                released += 1;
            }
        }
        Ok(released)
    }

    /// Runs every recovery step once at process start.
    pub async fn run_startup(&self) -> RecoveryReport {
        let report = self.run_pass().await;
        info!(
            stuck_tasks = %report.stuck_tasks,
            stuck_bugs = %report.stuck_bugs,
            orphaned_locks = %report.orphaned_locks,
            "startup recovery finished"
        );
        report
    }

    /// Runs every recovery step as part of the periodic sweep.
    pub async fn run_periodic(&self) -> RecoveryReport {
        let report = self.run_pass().await;
        debug!(
            stuck_tasks = %report.stuck_tasks,
            stuck_bugs = %report.stuck_bugs,
            orphaned_locks = %report.orphaned_locks,
            "periodic recovery finished"
        );
        report
    }

    async fn run_pass(&self) -> RecoveryReport {
        RecoveryReport {
            stuck_tasks: counted("stuck tasks", self.recover_stuck_tasks().await),
            stuck_bugs: counted("stuck bugs", self.recover_stuck_bugs().await),
            orphaned_locks: counted("orphaned locks", self.release_orphaned_locks().await),
        }
    }
}

fn counted<E: Display>(step: &str, result: Result<u64, E>) -> PassCount {
    result.map_or_else(
        |err| {
            warn!(step, error = %err, "recovery step skipped, store unreachable");
            PassCount::Unknown
        },
        PassCount::Known,
    )
}
