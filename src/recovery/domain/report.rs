//! Outcome counts of a recovery pass.

use serde::Serialize;
use std::fmt;

/// Number of rows a recovery step changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassCount {
    /// The step ran and changed this many rows.
    Known(u64),
    /// The step could not reach the store.
    Unknown,
}

impl PassCount {
    /// Returns the count when known.
    #[must_use]
    pub const fn known(self) -> Option<u64> {
        match self {
            Self::Known(count) => Some(count),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for PassCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(count) => write!(f, "{count}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// What one recovery pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Queue rows returned to waiting.
    pub stuck_tasks: PassCount,
    /// Bugs returned to open.
    pub stuck_bugs: PassCount,
    /// Stage locks cleared.
    pub orphaned_locks: PassCount,
}

impl RecoveryReport {
    /// Returns whether every step reached the store.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !matches!(self.stuck_tasks, PassCount::Unknown)
            && !matches!(self.stuck_bugs, PassCount::Unknown)
            && !matches!(self.orphaned_locks, PassCount::Unknown)
    }
}
