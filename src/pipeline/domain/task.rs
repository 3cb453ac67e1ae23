//! Task identity record.

use super::{TaskId, UserId};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};

/// Identity record of a submitted piece of work.
///
/// Created once when work is submitted and never re-created for the same
/// logical job; pipeline progress lives on the task's queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    user_id: UserId,
    scheduled_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new task with a freshly generated identifier.
    #[must_use]
    pub fn new(
        user_id: UserId,
        scheduled_time: Option<DateTime<Utc>>,
        clock: &impl Clock,
    ) -> Self {
        let created_at = clock.utc();
        Self {
            id: TaskId::generate(created_at),
            user_id,
            scheduled_time,
            created_at,
        }
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub const fn from_persisted(
        id: TaskId,
        user_id: UserId,
        scheduled_time: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            scheduled_time,
            created_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        &self.id
    }

    /// Returns the submitting user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the time the task was scheduled for, if any.
    #[must_use]
    pub const fn scheduled_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_time
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
