//! Bug record aggregate and its metadata bag.

use super::{BugDomainError, BugStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Auto-incremented bug identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BugId(i64);

impl BugId {
    /// Wraps a persisted identifier.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for BugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// JSON metadata stored with a bug.
///
/// Unknown keys written by other tools are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BugMetadata {
    /// When the current claim was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    /// Who took the current claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    /// Free-form history notes, oldest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    /// How many times the bug was reopened.
    #[serde(skip_serializing_if = "is_zero")]
    pub reopen_count: u32,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[expect(clippy::trivially_copy_pass_by_ref, reason = "serde skip predicate signature")]
const fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// Parameter object for reconstructing a persisted bug.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedBug {
    /// Persisted identifier.
    pub id: BugId,
    /// Persisted title.
    pub title: String,
    /// Persisted status.
    pub status: BugStatus,
    /// Persisted assignee.
    pub assigned_to: Option<String>,
    /// Persisted owner process.
    pub worker_pid: Option<u32>,
    /// Persisted metadata bag.
    pub metadata: BugMetadata,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A bug that agent workers can claim and fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BugRecord {
    id: BugId,
    title: String,
    status: BugStatus,
    assigned_to: Option<String>,
    worker_pid: Option<u32>,
    metadata: BugMetadata,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BugRecord {
    /// Reconstructs a bug from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedBug) -> Self {
        Self {
            id: data.id,
            title: data.title,
            status: data.status,
            assigned_to: data.assigned_to,
            worker_pid: data.worker_pid,
            metadata: data.metadata,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Validates a title for a new bug.
    ///
    /// # Errors
    ///
    /// Returns [`BugDomainError::EmptyTitle`] when the trimmed title is
    /// empty.
    pub fn validate_title(title: &str) -> Result<String, BugDomainError> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Err(BugDomainError::EmptyTitle);
        }
        Ok(trimmed.to_owned())
    }

    /// Returns the identifier.
    #[must_use]
    pub const fn id(&self) -> BugId {
        self.id
    }

    /// Returns the title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> BugStatus {
        self.status
    }

    /// Returns the assignee.
    #[must_use]
    pub fn assigned_to(&self) -> Option<&str> {
        self.assigned_to.as_deref()
    }

    /// Returns the PID of the agent process working on the bug.
    #[must_use]
    pub const fn worker_pid(&self) -> Option<u32> {
        self.worker_pid
    }

    /// Returns the metadata bag.
    #[must_use]
    pub const fn metadata(&self) -> &BugMetadata {
        &self.metadata
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Claims an open bug for `worker`, recording `owner_pid` as the process
    /// answerable for the claim.
    ///
    /// # Errors
    ///
    /// Returns [`BugDomainError::InvalidTransition`] unless the bug is open.
    pub fn claim(
        &mut self,
        worker: &str,
        owner_pid: u32,
        now: DateTime<Utc>,
    ) -> Result<(), BugDomainError> {
        self.ensure_status(&[BugStatus::Open], BugStatus::InProgress)?;
        self.status = BugStatus::InProgress;
        self.assigned_to = Some(worker.to_owned());
        self.worker_pid = Some(owner_pid);
        self.metadata.claimed_at = Some(now);
        self.metadata.claimed_by = Some(worker.to_owned());
        self.updated_at = now;
        Ok(())
    }

    /// Hands the claim from process `from_pid` to `pid`.
    ///
    /// Returns `false`, leaving the bug untouched, unless the bug is in
    /// progress and still owned by `from_pid`.
    pub fn attach_worker(&mut self, from_pid: u32, pid: u32, now: DateTime<Utc>) -> bool {
        if self.status != BugStatus::InProgress || self.worker_pid != Some(from_pid) {
            return false;
        }
        self.worker_pid = Some(pid);
        self.updated_at = now;
        true
    }

    /// Returns whether the recorded owner is exactly `expected_pid`; `None`
    /// matches only an ownerless bug.
    #[must_use]
    pub fn is_owned_by(&self, expected_pid: Option<u32>) -> bool {
        self.worker_pid == expected_pid
    }

    /// Returns an in-progress bug to the open pool and clears its owner.
    ///
    /// # Errors
    ///
    /// Returns [`BugDomainError::InvalidTransition`] unless the bug is in
    /// progress.
    pub fn release(&mut self, note: &str, now: DateTime<Utc>) -> Result<(), BugDomainError> {
        self.ensure_status(&[BugStatus::InProgress], BugStatus::Open)?;
        self.status = BugStatus::Open;
        self.assigned_to = None;
        self.worker_pid = None;
        self.push_note(note, now);
        Ok(())
    }

    /// Finishes an in-progress bug as resolved or failed.
    ///
    /// # Errors
    ///
    /// Returns [`BugDomainError::InvalidTransition`] unless the bug is in
    /// progress and `status` is a finishing status.
    pub fn finish(
        &mut self,
        status: BugStatus,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BugDomainError> {
        self.ensure_status(&[BugStatus::InProgress], status)?;
        if !matches!(status, BugStatus::Resolved | BugStatus::Failed) {
            return Err(self.invalid(status));
        }
        self.status = status;
        self.worker_pid = None;
        self.push_note(note, now);
        Ok(())
    }

    /// Closes a bug from any status.
    pub fn close(&mut self, note: &str, now: DateTime<Utc>) {
        self.status = BugStatus::Closed;
        self.worker_pid = None;
        self.push_note(note, now);
    }

    /// Reopens a resolved, closed, or failed bug.
    ///
    /// # Errors
    ///
    /// Returns [`BugDomainError::InvalidTransition`] when the bug is open or
    /// in progress.
    pub fn reopen(&mut self, note: &str, now: DateTime<Utc>) -> Result<(), BugDomainError> {
        self.ensure_status(
            &[BugStatus::Resolved, BugStatus::Closed, BugStatus::Failed],
            BugStatus::Open,
        )?;
        self.status = BugStatus::Open;
        self.assigned_to = None;
        self.worker_pid = None;
        self.metadata.reopen_count = self.metadata.reopen_count.saturating_add(1);
        self.push_note(note, now);
        Ok(())
    }

    fn push_note(&mut self, note: &str, now: DateTime<Utc>) {
        if !note.is_empty() {
            self.metadata
                .notes
                .push(format!("[{}] {note}", now.format("%Y-%m-%d %H:%M:%S")));
        }
        self.updated_at = now;
    }

    fn ensure_status(&self, allowed: &[BugStatus], to: BugStatus) -> Result<(), BugDomainError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(self.invalid(to))
        }
    }

    const fn invalid(&self, to: BugStatus) -> BugDomainError {
        BugDomainError::InvalidTransition {
            id: self.id,
            from: self.status,
            to,
        }
    }
}
