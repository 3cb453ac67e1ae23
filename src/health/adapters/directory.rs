//! Artifact store over the tasks root, scoped with `cap-std`.

use crate::health::ports::{ArtifactStore, ArtifactStoreError, ArtifactStoreResult};
use crate::pipeline::domain::TaskId;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use std::io::{self, ErrorKind};

/// Reads task directories under one root directory.
///
/// Every access is resolved relative to the root capability, so task
/// identifiers cannot reach outside it.
#[derive(Debug, Clone)]
pub struct TaskDirectoryStore {
    root: Utf8PathBuf,
}

impl TaskDirectoryStore {
    /// Creates a store rooted at `root`. The directory need not exist yet.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the tasks root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    async fn with_task_dir<T, F>(&self, task_id: &TaskId, f: F) -> ArtifactStoreResult<Option<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Dir) -> io::Result<Option<T>> + Send + 'static,
    {
        let root = self.root.clone();
        let name = task_id.as_str().to_owned();
        tokio::task::spawn_blocking(move || {
            let Some(dir) = open_task_dir(&root, &name)? else {
                return Ok(None);
            };
            f(&dir)
        })
        .await
        .map_err(|err| ArtifactStoreError::Task(err.to_string()))?
        .map_err(ArtifactStoreError::from)
    }
}

fn not_found_as_none<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn open_task_dir(root: &Utf8Path, name: &str) -> io::Result<Option<Dir>> {
    let Some(tasks) = not_found_as_none(Dir::open_ambient_dir(root, ambient_authority()))? else {
        return Ok(None);
    };
    not_found_as_none(tasks.open_dir(name))
}

fn last_lines(content: &str, count: usize) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    let skip = lines.len().saturating_sub(count);
    lines.into_iter().skip(skip).map(str::to_owned).collect()
}

#[async_trait]
impl ArtifactStore for TaskDirectoryStore {
    async fn task_dir_exists(&self, task_id: &TaskId) -> ArtifactStoreResult<bool> {
        let found = self.with_task_dir(task_id, |_| Ok(Some(()))).await?;
        Ok(found.is_some())
    }

    async fn find_marker(
        &self,
        task_id: &TaskId,
        markers: &[&str],
    ) -> ArtifactStoreResult<Option<String>> {
        let candidates: Vec<String> = markers.iter().map(|&marker| marker.to_owned()).collect();
        self.with_task_dir(task_id, move |dir| {
            Ok(candidates.into_iter().find(|marker| dir.exists(marker)))
        })
        .await
    }

    async fn tail(
        &self,
        task_id: &TaskId,
        file: &str,
        lines: usize,
    ) -> ArtifactStoreResult<Option<Vec<String>>> {
        let name = file.to_owned();
        self.with_task_dir(task_id, move |dir| {
            let Some(bytes) = not_found_as_none(dir.read(&name))? else {
                return Ok(None);
            };
            Ok(Some(last_lines(&String::from_utf8_lossy(&bytes), lines)))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::last_lines;

    #[test]
    fn last_lines_keeps_only_the_tail() {
        assert_eq!(last_lines("a\nb\nc\n", 2), vec!["b".to_owned(), "c".to_owned()]);
        assert_eq!(last_lines("only", 5), vec!["only".to_owned()]);
        assert!(last_lines("", 5).is_empty());
    }
}
