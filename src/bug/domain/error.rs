//! Error types for bug record validation and parsing.

use super::{BugId, BugStatus};
use thiserror::Error;

/// Errors returned while constructing or transitioning bug records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BugDomainError {
    /// The bug title is empty after trimming.
    #[error("bug title must not be empty")]
    EmptyTitle,

    /// The requested transition is not permitted from the current status.
    #[error("bug {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Bug whose transition was rejected.
        id: BugId,
        /// Current status.
        from: BugStatus,
        /// Requested status.
        to: BugStatus,
    },
}

/// Error returned while parsing a bug status from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown bug status: {0}")]
pub struct ParseBugStatusError(pub String);
