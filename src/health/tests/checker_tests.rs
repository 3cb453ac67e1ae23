//! Health checker reconciliation against task directories.

use std::sync::Arc;

use crate::clock::ManualClock;
use crate::health::{
    adapters::{InMemoryArtifactStore, TaskDirectoryStore},
    domain::HealthVerdict,
    ports::{ArtifactStore, ArtifactStoreError, ArtifactStoreResult},
    services::HealthChecker,
};
use crate::pipeline::{
    adapters::memory::InMemoryQueueRepository,
    domain::{QueueStatus, Stage, TaskId, TaskQueueEntry},
    services::{QueueManager, TaskLogWriter},
};
use crate::recovery::domain::PassCount;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use eyre::{Result, ensure};
use rstest::{fixture, rstest};

type TestQueue = QueueManager<InMemoryQueueRepository, ManualClock>;

struct Harness {
    queue: TestQueue,
    artifacts: InMemoryArtifactStore,
    clock: Arc<ManualClock>,
    checker: HealthChecker<InMemoryQueueRepository, InMemoryArtifactStore, ManualClock>,
}

impl Harness {
    async fn processing_script(&self) -> Result<TaskQueueEntry> {
        self.queue.enqueue("creator", None).await?;
        self.queue
            .dequeue(Stage::Script, 900)
            .await?
            .ok_or_else(|| eyre::eyre!("nothing to claim"))
    }

    async fn row(&self, task_id: &TaskId) -> Result<TaskQueueEntry> {
        self.queue
            .find(task_id)
            .await?
            .ok_or_else(|| eyre::eyre!("row {task_id} missing"))
    }
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp"),
    ));
    let queue = QueueManager::new(Arc::new(InMemoryQueueRepository::new()), Arc::clone(&clock));
    let artifacts = InMemoryArtifactStore::new();
    Harness {
        checker: HealthChecker::new(queue.clone(), Arc::new(artifacts.clone()), Arc::clone(&clock)),
        queue,
        artifacts,
        clock,
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn completion_marker_forces_completed(harness: Harness) -> Result<()> {
    let row = harness.processing_script().await?;
    harness.artifacts.write(row.task_id(), "final_shorts.mp4", "");

    let (checked, findings) = harness.checker.check_all().await?;

    ensure!(checked == 1);
    ensure!(findings.len() == 1 && findings.iter().all(|finding| finding.repaired));
    ensure!(findings.iter().all(|finding| {
        finding.verdict
            == HealthVerdict::Completed {
                marker: "final_shorts.mp4".to_owned(),
            }
    }));
    let repaired = harness.row(row.task_id()).await?;
    ensure!(repaired.status() == QueueStatus::Completed);
    ensure!(repaired.error().is_none());
    ensure!(harness.queue.content_status(row.task_id()).await?.as_deref() == Some("completed"));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stage_log_error_forces_failed_with_truncated_line(harness: Harness) -> Result<()> {
    let row = harness.processing_script().await?;
    let long_line = format!("[2026-06-01 09:00:00] Error: {}", "x".repeat(200));
    harness
        .artifacts
        .write(row.task_id(), "script.log", &format!("starting\n{long_line}\n"));

    harness.checker.run_pass().await;

    let repaired = harness.row(row.task_id()).await?;
    ensure!(repaired.status() == QueueStatus::Failed);
    let expected: String = long_line.chars().take(100).collect();
    ensure!(repaired.error() == Some(format!("script.log: {expected}").as_str()));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn only_the_current_stage_log_tail_is_scanned(harness: Harness) -> Result<()> {
    let row = harness.processing_script().await?;
    harness.artifacts.write(row.task_id(), "image_crawl.log", "Error: wrong stage\n");
    let mut script_log = String::from("Exception: long ago\n");
    for line in 0..60 {
        script_log.push_str(&format!("progress {line}\n"));
    }
    harness.artifacts.write(row.task_id(), "script.log", &script_log);

    let verdict = harness.checker.inspect(&row).await?;

    ensure!(verdict == HealthVerdict::Healthy);
    Ok(())
}

#[rstest]
#[case(59, QueueStatus::Processing)]
#[case(61, QueueStatus::Failed)]
#[tokio::test(flavor = "multi_thread")]
async fn processing_row_becomes_zombie_after_an_hour(
    harness: Harness,
    #[case] minutes: i64,
    #[case] expected: QueueStatus,
) -> Result<()> {
    let row = harness.processing_script().await?;
    harness.artifacts.write(row.task_id(), "script.log", "[2026-06-01 09:00:00] thinking\n");
    harness.clock.advance(Duration::minutes(minutes));

    let report = harness.checker.run_pass().await;

    let current = harness.row(row.task_id()).await?;
    ensure!(current.status() == expected);
    if expected == QueueStatus::Failed {
        ensure!(current.error().is_some_and(|error| error.starts_with("timeout:")));
        ensure!(report.repaired == PassCount::Known(1));
    } else {
        ensure!(report.repaired == PassCount::Known(0));
    }
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn old_waiting_rows_are_not_zombies(harness: Harness) -> Result<()> {
    let row = harness.queue.enqueue("creator", None).await?;
    harness.artifacts.create_dir(row.task_id());
    harness.clock.advance(Duration::hours(5));

    ensure!(harness.checker.inspect(&row).await? == HealthVerdict::Healthy);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn missing_directory_is_not_evidence(harness: Harness) -> Result<()> {
    let row = harness.processing_script().await?;
    harness.clock.advance(Duration::hours(3));

    let report = harness.checker.run_pass().await;

    ensure!(report.checked == PassCount::Known(1));
    ensure!(report.repaired == PassCount::Known(0));
    ensure!(harness.row(row.task_id()).await?.status() == QueueStatus::Processing);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn repair_is_conditional_on_recorded_status(harness: Harness) -> Result<()> {
    let row = harness.processing_script().await?;
    harness.artifacts.write(row.task_id(), "output.mp4", "");
    harness
        .queue
        .fail(row.task_id(), Stage::Script, "exit code 1: boom")
        .await?;

    let applied = harness
        .queue
        .reconcile(row.task_id(), row.status(), QueueStatus::Completed, None)
        .await?;

    ensure!(!applied);
    let current = harness.row(row.task_id()).await?;
    ensure!(current.status() == QueueStatus::Failed);
    let (checked, findings) = harness.checker.check_all().await?;
    ensure!(checked == 0 && findings.is_empty());
    Ok(())
}

struct UnreadableStore;

#[async_trait]
impl ArtifactStore for UnreadableStore {
    async fn task_dir_exists(&self, _task_id: &TaskId) -> ArtifactStoreResult<bool> {
        Err(ArtifactStoreError::Task("disk unplugged".to_owned()))
    }

    async fn find_marker(
        &self,
        _task_id: &TaskId,
        _markers: &[&str],
    ) -> ArtifactStoreResult<Option<String>> {
        Ok(None)
    }

    async fn tail(
        &self,
        _task_id: &TaskId,
        _file: &str,
        _lines: usize,
    ) -> ArtifactStoreResult<Option<Vec<String>>> {
        Ok(None)
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unreadable_directories_are_skipped(harness: Harness) -> Result<()> {
    let row = harness.processing_script().await?;
    harness.clock.advance(Duration::hours(2));
    let checker = HealthChecker::new(
        harness.queue.clone(),
        Arc::new(UnreadableStore),
        Arc::clone(&harness.clock),
    );

    let report = checker.run_pass().await;

    ensure!(report.checked == PassCount::Known(1));
    ensure!(report.repaired == PassCount::Known(0));
    ensure!(harness.row(row.task_id()).await?.status() == QueueStatus::Processing);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn directory_store_reads_markers_and_log_tails() -> Result<()> {
    let root = tempfile::TempDir::new()?;
    let root_path = camino::Utf8PathBuf::from_path_buf(root.path().to_path_buf())
        .map_err(|path| eyre::eyre!("non utf-8 temp dir {}", path.display()))?;
    let store = TaskDirectoryStore::new(root_path.join("tasks"));
    let task_id = TaskId::new("1767225600000_feedbeef")?;

    ensure!(!store.task_dir_exists(&task_id).await?);
    ensure!(store.find_marker(&task_id, &["final.mp4"]).await?.is_none());

    let task_dir = root_path.join("tasks").join(task_id.as_str());
    std::fs::create_dir_all(&task_dir)?;
    std::fs::write(task_dir.join("video.log"), "one\ntwo\nthree\n")?;
    std::fs::write(task_dir.join("output.mp4"), b"")?;

    ensure!(store.task_dir_exists(&task_id).await?);
    let marker = store
        .find_marker(&task_id, &["final.mp4", "output.mp4"])
        .await?;
    ensure!(marker.as_deref() == Some("output.mp4"));
    let tail = store.tail(&task_id, "video.log", 2).await?;
    ensure!(tail == Some(vec!["two".to_owned(), "three".to_owned()]));
    ensure!(store.tail(&task_id, "script.log", 2).await?.is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn errors_before_the_latest_claim_are_ignored(harness: Harness) -> Result<()> {
    let row = harness.processing_script().await?;
    harness.artifacts.write(
        row.task_id(),
        "script.log",
        concat!(
            "[2026-06-01 08:00:00] claimed by worker pid 800\n",
            "[2026-06-01 08:01:00] Error: quota exceeded\n",
            "[2026-06-01 08:30:00] task reopened\n",
            "[2026-06-01 09:00:00] claimed by worker pid 900\n",
            "[2026-06-01 09:00:01] writing scene 1\n",
        ),
    );

    ensure!(harness.checker.inspect(&row).await? == HealthVerdict::Healthy);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reopened_task_is_not_failed_again_by_its_old_log() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .map_err(|path| eyre::eyre!("non utf-8 temp dir {}", path.display()))?;
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp"),
    ));
    let queue = QueueManager::new(Arc::new(InMemoryQueueRepository::new()), Arc::clone(&clock));
    let logs = TaskLogWriter::new(root.clone(), Arc::clone(&clock));
    let checker = HealthChecker::new(
        queue.clone(),
        Arc::new(TaskDirectoryStore::new(root)),
        Arc::clone(&clock),
    );
    let entry = queue.enqueue("creator", None).await?;
    let task_id = entry.task_id().clone();
    queue.dequeue(Stage::Script, 900).await?;
    logs.append(&task_id, Stage::Script, "claimed by worker pid 900").await;
    logs.append(&task_id, Stage::Script, "Error: quota exceeded").await;
    ensure!(queue.fail(&task_id, Stage::Script, "exit code 1").await?);

    ensure!(queue.reopen(&task_id, &logs).await?.status() == QueueStatus::Waiting);
    checker.run_pass().await;

    let row = queue
        .find(&task_id)
        .await?
        .ok_or_else(|| eyre::eyre!("row {task_id} missing"))?;
    ensure!(row.status() == QueueStatus::Waiting);
    ensure!(queue.dequeue(Stage::Script, 901).await?.is_some());
    Ok(())
}
