//! Health verdicts derived from a task directory.

use crate::pipeline::domain::QueueStatus;
use serde::Serialize;

/// Files whose presence means the pipeline finished for a task.
pub const COMPLETION_MARKERS: [&str; 3] = ["final.mp4", "final_shorts.mp4", "output.mp4"];

/// Number of trailing log lines scanned for error signatures.
pub const LOG_TAIL_LINES: usize = 50;

/// Maximum number of characters of the matching log line kept in the error.
pub const ERROR_LINE_CHARS: usize = 100;

/// Prefix of the error recorded for a zombie task.
pub const TIMEOUT_PREFIX: &str = "timeout:";

/// What the filesystem says about a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum HealthVerdict {
    /// Nothing contradicts the recorded status.
    Healthy,
    /// A completion marker exists.
    Completed {
        /// Marker file found.
        marker: String,
    },
    /// The stage log carries an error signature.
    Failed {
        /// `<log file>: <line>` with the line truncated.
        reason: String,
    },
    /// The row has been processing for longer than the zombie threshold.
    TimedOut {
        /// Error beginning with [`TIMEOUT_PREFIX`].
        reason: String,
    },
}

impl HealthVerdict {
    /// Builds a failed verdict from a log name and its matching line.
    #[must_use]
    pub fn from_log_line(log_file: &str, line: &str) -> Self {
        let truncated: String = line.chars().take(ERROR_LINE_CHARS).collect();
        Self::Failed {
            reason: format!("{log_file}: {truncated}"),
        }
    }

    /// Builds a timeout verdict for a row processing for `minutes`.
    #[must_use]
    pub fn timed_out(minutes: i64) -> Self {
        Self::TimedOut {
            reason: format!("{TIMEOUT_PREFIX} processing for {minutes} minutes without progress"),
        }
    }

    /// Returns the status the verdict implies, or `None` when healthy.
    #[must_use]
    pub const fn target_status(&self) -> Option<QueueStatus> {
        match self {
            Self::Healthy => None,
            Self::Completed { .. } => Some(QueueStatus::Completed),
            Self::Failed { .. } | Self::TimedOut { .. } => Some(QueueStatus::Failed),
        }
    }

    /// Returns the error to record with the new status.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Healthy | Self::Completed { .. } => None,
            Self::Failed { reason } | Self::TimedOut { reason } => Some(reason),
        }
    }
}
