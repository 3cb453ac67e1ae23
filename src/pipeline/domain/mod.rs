//! Domain model for the pipeline task store.
//!
//! Tasks are identity records; each task owns exactly one queue entry that
//! records its current stage and status.

mod entry;
mod error;
mod ids;
mod stage;
mod task;
mod summary;

pub use entry::{PersistedQueueEntry, StageAdvance, TaskQueueEntry};
pub use error::{ParseQueueStatusError, ParseStageError, QueueDomainError};
pub use ids::{TaskId, UserId};
pub use stage::{QueueStatus, Stage};
pub use summary::{QueueSummary, StageCounts};
pub use task::Task;
