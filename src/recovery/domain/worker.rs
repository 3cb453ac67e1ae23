//! Agent workers tracked by the pool.

use crate::bug::domain::BugId;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

/// Pool-local worker identifier, displayed as `worker-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Wraps a sequence number.
    #[must_use]
    pub const fn new(sequence: u64) -> Self {
        Self(sequence)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Lifecycle of a tracked worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedStatus {
    /// The launch has not completed; an exit now is a spawn failure.
    Spawning,
    /// The process is detached and running; exit events are ignored and
    /// liveness is checked by PID instead.
    Running,
}

/// A detached agent process working on one bug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedWorker {
    /// Pool-local identifier.
    pub id: WorkerId,
    /// Launcher kind that started it.
    pub kind: String,
    /// Bug the worker was launched for.
    pub bug_id: BugId,
    /// When the launch began.
    pub spawned_at: DateTime<Utc>,
    /// Process id once running.
    pub pid: Option<u32>,
    /// Lifecycle state.
    pub status: TrackedStatus,
}

impl TrackedWorker {
    /// Returns whether the worker has existed for at least `min_age`.
    #[must_use]
    pub fn is_older_than(&self, now: DateTime<Utc>, min_age: Duration) -> bool {
        now - self.spawned_at >= min_age
    }
}
