//! Read-only access to task directories.

use crate::pipeline::domain::TaskId;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for artifact store operations.
pub type ArtifactStoreResult<T> = Result<T, ArtifactStoreError>;

/// Inspects the on-disk artifacts of tasks.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns whether the directory of `task_id` exists.
    async fn task_dir_exists(&self, task_id: &TaskId) -> ArtifactStoreResult<bool>;

    /// Returns the first of `markers` present in the task directory.
    async fn find_marker(
        &self,
        task_id: &TaskId,
        markers: &[&str],
    ) -> ArtifactStoreResult<Option<String>>;

    /// Returns up to the last `lines` lines of `file` in the task directory,
    /// or `None` when the file does not exist.
    async fn tail(
        &self,
        task_id: &TaskId,
        file: &str,
        lines: usize,
    ) -> ArtifactStoreResult<Option<Vec<String>>>;
}

/// Errors returned by artifact stores.
#[derive(Debug, Clone, Error)]
pub enum ArtifactStoreError {
    /// Filesystem access failed.
    #[error("artifact store I/O error: {0}")]
    Io(Arc<std::io::Error>),
    /// The blocking read task did not complete.
    #[error("artifact read task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for ArtifactStoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
