//! Recovery reports and tracked agent workers.

mod report;
mod worker;

pub use report::{PassCount, RecoveryReport};
pub use worker::{TrackedStatus, TrackedWorker, WorkerId};
