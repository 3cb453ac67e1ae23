//! In-memory artifact store for tests.

use crate::health::ports::{ArtifactStore, ArtifactStoreResult};
use crate::pipeline::domain::TaskId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Files = BTreeMap<TaskId, BTreeMap<String, String>>;

/// Task directories held as maps of file name to contents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    dirs: Arc<Mutex<Files>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn dirs(&self) -> MutexGuard<'_, Files> {
        self.dirs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an empty directory for `task_id`.
    pub fn create_dir(&self, task_id: &TaskId) {
        self.dirs().entry(task_id.clone()).or_default();
    }

    /// Writes `contents` to `file`, creating the directory when needed.
    pub fn write(&self, task_id: &TaskId, file: &str, contents: &str) {
        self.dirs()
            .entry(task_id.clone())
            .or_default()
            .insert(file.to_owned(), contents.to_owned());
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn task_dir_exists(&self, task_id: &TaskId) -> ArtifactStoreResult<bool> {
        Ok(self.dirs().contains_key(task_id))
    }

    async fn find_marker(
        &self,
        task_id: &TaskId,
        markers: &[&str],
    ) -> ArtifactStoreResult<Option<String>> {
        let dirs = self.dirs();
        Ok(dirs.get(task_id).and_then(|files| {
            markers
                .iter()
                .find(|&&marker| files.contains_key(marker))
                .map(|&marker| marker.to_owned())
        }))
    }

    async fn tail(
        &self,
        task_id: &TaskId,
        file: &str,
        lines: usize,
    ) -> ArtifactStoreResult<Option<Vec<String>>> {
        let dirs = self.dirs();
        Ok(dirs
            .get(task_id)
            .and_then(|files| files.get(file))
            .map(|contents| {
                let all: Vec<&str> = contents.lines().collect();
                let skip = all.len().saturating_sub(lines);
                all.into_iter().skip(skip).map(str::to_owned).collect()
            }))
    }
}
