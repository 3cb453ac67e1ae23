//! Recovery and worker pool services.

mod pool;
mod recovery;

pub use pool::{DispatchOutcome, ExitHandling, PoolSettings, WorkerPool, WorkerPoolError};
pub use recovery::{RecoveryError, RecoveryService, STUCK_BUG_NOTE};
