//! Incremental, timestamped stage logs inside task directories.

use crate::pipeline::domain::{Stage, TaskId};
use camino::{Utf8Path, Utf8PathBuf};
use mockable::Clock;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Message a worker writes when it claims a task at a stage.
pub const CLAIM_MARKER: &str = "claimed by worker pid";

/// Message written when a failed or cancelled task is put back in its queue.
pub const REOPEN_MARKER: &str = "task reopened";

/// Returns whether a stage log line opens a new attempt at the stage.
///
/// Lines before the last such line belong to earlier attempts.
#[must_use]
pub fn starts_attempt(line: &str) -> bool {
    let message = line.split_once("] ").map_or(line, |(_, rest)| rest);
    message.starts_with(CLAIM_MARKER) || message.starts_with(REOPEN_MARKER)
}

/// Appends `[YYYY-MM-DD HH:MM:SS] message` lines to
/// `<tasks_root>/<task_id>/<stage log>`.
#[derive(Clone)]
pub struct TaskLogWriter<C>
where
    C: Clock + Send + Sync,
{
    tasks_root: Utf8PathBuf,
    clock: Arc<C>,
}

impl<C> TaskLogWriter<C>
where
    C: Clock + Send + Sync,
{
    /// Creates a writer rooted at `tasks_root`.
    #[must_use]
    pub fn new(tasks_root: impl Into<Utf8PathBuf>, clock: Arc<C>) -> Self {
        Self {
            tasks_root: tasks_root.into(),
            clock,
        }
    }

    /// Returns the directory of a task.
    #[must_use]
    pub fn task_dir(&self, task_id: &TaskId) -> Utf8PathBuf {
        self.tasks_root.join(task_id.as_str())
    }

    /// Returns the log path of a task's stage.
    #[must_use]
    pub fn log_path(&self, task_id: &TaskId, stage: Stage) -> Utf8PathBuf {
        self.task_dir(task_id).join(stage.log_file_name())
    }

    /// Appends one line; failures are logged and swallowed.
    pub async fn append(&self, task_id: &TaskId, stage: Stage, message: &str) {
        if let Err(err) = self.try_append(task_id, stage, message).await {
            warn!(task_id = %task_id, %stage, error = %err, "failed to append stage log");
        }
    }

    /// Appends one line, creating the task directory when needed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub async fn try_append(
        &self,
        task_id: &TaskId,
        stage: Stage,
        message: &str,
    ) -> std::io::Result<()> {
        let dir = self.task_dir(task_id);
        tokio::fs::create_dir_all(&dir).await?;
        let line = format_line(
            &self.clock.utc().format("%Y-%m-%d %H:%M:%S").to_string(),
            message,
        );
        append_to(&self.log_path(task_id, stage), &line).await
    }
}

fn format_line(timestamp: &str, message: &str) -> String {
    let trimmed = message.trim_end_matches(['\r', '\n']);
    format!("[{timestamp}] {trimmed}\n")
}

async fn append_to(path: &Utf8Path, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
