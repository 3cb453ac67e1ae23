//! Pipeline stages and queue statuses.

use super::{ParseQueueStatusError, ParseStageError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four ordered pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Script writing.
    Script,
    /// Image search and generation.
    Image,
    /// Video rendering.
    Video,
    /// Upload to the publishing platform.
    Upload,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Self; 4] = [Self::Script, Self::Image, Self::Video, Self::Upload];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Image => "image",
            Self::Video => "video",
            Self::Upload => "upload",
        }
    }

    /// Returns the stage that follows this one, or `None` for the final
    /// stage.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Script => Some(Self::Image),
            Self::Image => Some(Self::Video),
            Self::Video => Some(Self::Upload),
            Self::Upload => None,
        }
    }

    /// Returns the name of the stage's log file inside the task directory.
    #[must_use]
    pub const fn log_file_name(self) -> &'static str {
        match self {
            Self::Script => "script.log",
            Self::Image => "image_crawl.log",
            Self::Video => "video.log",
            Self::Upload => "upload.log",
        }
    }

    /// Returns whether this is the last stage of the pipeline.
    #[must_use]
    pub const fn is_final(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Stage {
    type Error = ParseStageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "script" => Ok(Self::Script),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            // Older rows name the upload stage after the platform.
            "upload" | "youtube" => Ok(Self::Upload),
            _ => Err(ParseStageError(value.to_owned())),
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(value)
    }
}

/// Status of a task's queue row within its current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Eligible to be claimed by a worker of the row's stage.
    Waiting,
    /// Claimed by a worker.
    Processing,
    /// Final stage finished successfully.
    Completed,
    /// A stage failed; requires an explicit reopen.
    Failed,
    /// Stopped by a worker shutdown or an operator.
    Cancelled,
}

impl QueueStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns whether no worker will pick the row up again without an
    /// explicit reopen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for QueueStatus {
    type Error = ParseQueueStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "waiting" => Ok(Self::Waiting),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseQueueStatusError(value.to_owned())),
        }
    }
}
