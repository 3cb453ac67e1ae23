//! Port for launching detached agent workers.

use crate::bug::domain::BugRecord;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

/// A launched agent process.
#[derive(Debug)]
pub struct LaunchedWorker {
    /// Process id of the agent.
    pub pid: u32,
    /// Resolves with the exit code when the launcher can observe the exit.
    pub exit: Option<oneshot::Receiver<Option<i32>>>,
}

/// Starts agent processes for claimed bugs.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launcher kind; recorded as the bug assignee.
    fn kind(&self) -> &str;

    /// Maximum number of concurrently tracked workers of this kind.
    fn capacity(&self) -> usize {
        1
    }

    /// Launches an agent for `bug`.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the process cannot be started.
    async fn launch(&self, bug: &BugRecord) -> Result<LaunchedWorker, LaunchError>;
}

/// Launch failures.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Argument templates failed to render.
    #[error("failed to render launcher arguments: {0}")]
    Template(String),
    /// The process could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The process started but reported no process id.
    #[error("launched process reported no pid")]
    MissingPid,
}
