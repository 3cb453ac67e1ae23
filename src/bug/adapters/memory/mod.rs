//! In-memory bug repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bug::{
    domain::{BugId, BugMetadata, BugRecord, BugStatus, PersistedBug},
    ports::{BugRepository, BugRepositoryError, BugRepositoryResult},
};

/// Thread-safe in-memory bug repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBugRepository {
    state: Arc<Mutex<InMemoryBugState>>,
}

#[derive(Debug, Default)]
struct InMemoryBugState {
    next_id: i64,
    bugs: BTreeMap<BugId, BugRecord>,
}

impl InMemoryBugRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> BugRepositoryResult<MutexGuard<'_, InMemoryBugState>> {
        self.state
            .lock()
            .map_err(|err| BugRepositoryError::persistence(std::io::Error::other(err.to_string())))
    }

    fn mutate<F>(&self, id: BugId, f: F) -> BugRepositoryResult<bool>
    where
        F: FnOnce(&mut BugRecord) -> bool,
    {
        let mut state = self.guard()?;
        let bug = state
            .bugs
            .get_mut(&id)
            .ok_or(BugRepositoryError::NotFound(id))?;
        Ok(f(bug))
    }
}

#[async_trait]
impl BugRepository for InMemoryBugRepository {
    async fn create(&self, title: &str, now: DateTime<Utc>) -> BugRepositoryResult<BugRecord> {
        let mut state = self.guard()?;
        state.next_id += 1;
        let id = BugId::new(state.next_id);
        let bug = BugRecord::from_persisted(PersistedBug {
            id,
            title: title.to_owned(),
            status: BugStatus::Open,
            assigned_to: None,
            worker_pid: None,
            metadata: BugMetadata::default(),
            created_at: now,
            updated_at: now,
        });
        state.bugs.insert(id, bug.clone());
        Ok(bug)
    }

    async fn claim_next(
        &self,
        worker: &str,
        owner_pid: u32,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<Option<BugRecord>> {
        let mut state = self.guard()?;
        let oldest = state
            .bugs
            .values()
            .filter(|bug| bug.status() == BugStatus::Open)
            .min_by_key(|bug| (bug.created_at(), bug.id()))
            .map(BugRecord::id);
        let Some(bug) = oldest.and_then(|id| state.bugs.get_mut(&id)) else {
            return Ok(None);
        };
        if bug.claim(worker, owner_pid, now).is_err() {
            return Ok(None);
        }
        Ok(Some(bug.clone()))
    }

    async fn attach_worker(
        &self,
        id: BugId,
        from_pid: u32,
        pid: u32,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool> {
        self.mutate(id, |bug| bug.attach_worker(from_pid, pid, now))
    }

    async fn release(
        &self,
        id: BugId,
        expected_pid: Option<u32>,
        note: &str,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool> {
        self.mutate(id, |bug| {
            if !bug.is_owned_by(expected_pid) {
                return false;
            }
            bug.release(note, now).is_ok()
        })
    }

    async fn finish(
        &self,
        id: BugId,
        status: BugStatus,
        note: &str,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool> {
        self.mutate(id, |bug| bug.finish(status, note, now).is_ok())
    }

    async fn reopen(
        &self,
        id: BugId,
        note: &str,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool> {
        self.mutate(id, |bug| bug.reopen(note, now).is_ok())
    }

    async fn find(&self, id: BugId) -> BugRepositoryResult<Option<BugRecord>> {
        Ok(self.guard()?.bugs.get(&id).cloned())
    }

    async fn list_by_status(&self, statuses: &[BugStatus]) -> BugRepositoryResult<Vec<BugRecord>> {
        let state = self.guard()?;
        let mut bugs: Vec<BugRecord> = state
            .bugs
            .values()
            .filter(|bug| statuses.contains(&bug.status()))
            .cloned()
            .collect();
        bugs.sort_by_key(|bug| (bug.created_at(), bug.id()));
        Ok(bugs)
    }
}
