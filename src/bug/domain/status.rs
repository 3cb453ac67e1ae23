//! Bug lifecycle status.

use super::ParseBugStatusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a bug record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugStatus {
    /// Waiting to be claimed.
    Open,
    /// Claimed by an agent worker.
    InProgress,
    /// Fixed by the agent.
    Resolved,
    /// Closed by an operator.
    Closed,
    /// The agent gave up.
    Failed,
}

impl BugStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for BugStatus {
    type Error = ParseBugStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseBugStatusError(value.to_owned())),
        }
    }
}
