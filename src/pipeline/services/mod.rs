//! Application services for the pipeline task store.

mod log_writer;
mod queue;

pub use log_writer::{CLAIM_MARKER, REOPEN_MARKER, TaskLogWriter, starts_attempt};
pub use queue::{DEFAULT_RETENTION_DAYS, QueueManager, QueueManagerError, QueueManagerResult};
