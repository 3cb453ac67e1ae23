//! Stage worker service.

mod stage_worker;

pub use stage_worker::{
    DEFAULT_POLL_INTERVAL, PollOutcome, SHUTDOWN_REASON, StageWorker, StageWorkerError,
    WorkerSettings,
};
