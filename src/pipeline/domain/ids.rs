//! Identifier types for the pipeline domain.

use super::QueueDomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a pipeline task.
///
/// The same value names the task's queue row, its content row, and its
/// artifact directory for the whole lifetime of the task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a new identifier of the form `<unix-millis>_<8 hex chars>`.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let short: String = suffix.chars().take(8).collect();
        Self(format!("{}_{short}", now.timestamp_millis()))
    }

    /// Wraps an existing identifier.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidTaskId`] when the value is empty or
    /// contains whitespace or path separators.
    pub fn new(value: impl Into<String>) -> Result<Self, QueueDomainError> {
        let raw = value.into();
        let is_valid = !raw.is_empty()
            && !raw
                .chars()
                .any(|ch| ch.is_whitespace() || ch == '/' || ch == '\\');
        if !is_valid {
            return Err(QueueDomainError::InvalidTaskId(raw));
        }
        Ok(Self(raw))
    }

    /// Returns the identifier as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the user who submitted a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a validated user identifier.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::EmptyUserId`] when the trimmed value is
    /// empty.
    pub fn new(value: impl Into<String>) -> Result<Self, QueueDomainError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(QueueDomainError::EmptyUserId);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the identifier as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
