//! Domain model for stage locks.

use crate::pipeline::domain::{Stage, TaskId};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Seconds after which a held lock is considered abandoned.
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 60 * 60;

/// Current holder of a stage lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    /// Task executing under the lock.
    pub task_id: TaskId,
    /// When the lock was taken.
    pub locked_at: DateTime<Utc>,
    /// PID of the worker holding the lock.
    pub worker_pid: Option<u32>,
}

/// State of one stage's lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageLock {
    stage: Stage,
    holder: Option<LockHolder>,
}

impl StageLock {
    /// Creates an unheld lock.
    #[must_use]
    pub const fn free(stage: Stage) -> Self {
        Self {
            stage,
            holder: None,
        }
    }

    /// Creates a held lock.
    #[must_use]
    pub const fn held(stage: Stage, holder: LockHolder) -> Self {
        Self {
            stage,
            holder: Some(holder),
        }
    }

    /// Returns the locked stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns the holder, if any.
    #[must_use]
    pub const fn holder(&self) -> Option<&LockHolder> {
        self.holder.as_ref()
    }

    /// Returns whether `task_id` holds the lock.
    #[must_use]
    pub fn is_held_by(&self, task_id: &TaskId) -> bool {
        self.holder
            .as_ref()
            .is_some_and(|holder| &holder.task_id == task_id)
    }

    /// Returns whether a holder exists and took the lock before
    /// `now - timeout`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.holder
            .as_ref()
            .is_some_and(|holder| holder.locked_at < now - timeout)
    }

    /// Returns whether the lock may be granted at `now`.
    #[must_use]
    pub fn is_available(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.holder.is_none() || self.is_expired(now, timeout)
    }

    /// Grants the lock to a new holder.
    pub fn grant(&mut self, holder: LockHolder) {
        self.holder = Some(holder);
    }

    /// Clears the holder.
    pub fn clear(&mut self) {
        self.holder = None;
    }
}
