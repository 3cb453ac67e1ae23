//! Error types for pipeline domain validation and parsing.

use super::{QueueStatus, Stage, TaskId};
use thiserror::Error;

/// Errors returned while constructing or transitioning queue values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueDomainError {
    /// The task identifier is empty or malformed.
    #[error("invalid task identifier '{0}'")]
    InvalidTaskId(String),

    /// The user identifier is empty after trimming.
    #[error("user identifier must not be empty")]
    EmptyUserId,

    /// The requested transition is not permitted from the current status.
    #[error("task {task_id} at stage {stage} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task whose transition was rejected.
        task_id: TaskId,
        /// Stage the row is currently at.
        stage: Stage,
        /// Current status.
        from: QueueStatus,
        /// Requested status.
        to: QueueStatus,
    },
}

/// Error returned while parsing a stage from persistence or input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown pipeline stage: {0}")]
pub struct ParseStageError(pub String);

/// Error returned while parsing a queue status from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown queue status: {0}")]
pub struct ParseQueueStatusError(pub String);
