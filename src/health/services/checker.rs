//! Reconciles queue rows against their task directories.

use crate::health::{
    domain::{COMPLETION_MARKERS, HealthVerdict, LOG_TAIL_LINES, LogClassifier},
    ports::{ArtifactStore, ArtifactStoreError},
};
use crate::pipeline::{
    domain::{QueueStatus, TaskQueueEntry},
    ports::QueueRepository,
    services::{QueueManager, QueueManagerError, starts_attempt},
};
use crate::recovery::domain::PassCount;
use chrono::Duration;
use mockable::Clock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default age after which a processing row counts as a zombie.
pub const DEFAULT_ZOMBIE_THRESHOLD_MINUTES: i64 = 60;

/// Errors from a health pass.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    /// Queue store failed.
    #[error(transparent)]
    Queue(#[from] QueueManagerError),
    /// A task directory could not be read.
    #[error(transparent)]
    Artifacts(#[from] ArtifactStoreError),
}

/// One row whose recorded status the filesystem contradicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthFinding {
    /// Row inspected.
    pub entry: TaskQueueEntry,
    /// Evidence found.
    pub verdict: HealthVerdict,
    /// Whether the compare-and-set write was applied.
    pub repaired: bool,
}

/// Counts of one health pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Rows inspected.
    pub checked: PassCount,
    /// Rows whose status was rewritten.
    pub repaired: PassCount,
}

/// Compares waiting and processing rows with completion markers, stage log
/// error signatures, and processing age.
pub struct HealthChecker<Q, A, C>
where
    Q: QueueRepository,
    A: ArtifactStore,
    C: Clock + Send + Sync,
{
    queue: QueueManager<Q, C>,
    artifacts: Arc<A>,
    clock: Arc<C>,
    classifier: &'static LogClassifier,
    zombie_threshold: Duration,
}

impl<Q, A, C> HealthChecker<Q, A, C>
where
    Q: QueueRepository,
    A: ArtifactStore,
    C: Clock + Send + Sync,
{
    /// Creates a checker with the standard classifier and a one hour zombie
    /// threshold.
    #[must_use]
    pub fn new(queue: QueueManager<Q, C>, artifacts: Arc<A>, clock: Arc<C>) -> Self {
        Self {
            queue,
            artifacts,
            clock,
            classifier: LogClassifier::standard(),
            zombie_threshold: Duration::minutes(DEFAULT_ZOMBIE_THRESHOLD_MINUTES),
        }
    }

    /// Overrides the zombie threshold.
    #[must_use]
    pub const fn with_zombie_threshold(mut self, threshold: Duration) -> Self {
        self.zombie_threshold = threshold;
        self
    }

    /// Derives the verdict for one row.
    ///
    /// Only the stage log lines after the last claim or reopen marker are
    /// scanned, so a retried task is not judged by its earlier attempt. A
    /// missing task directory is not evidence of anything and yields
    /// [`HealthVerdict::Healthy`].
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactStoreError`] when the directory cannot be read.
    pub async fn inspect(&self, entry: &TaskQueueEntry) -> Result<HealthVerdict, ArtifactStoreError> {
        let task_id = entry.task_id();
        if !self.artifacts.task_dir_exists(task_id).await? {
            return Ok(HealthVerdict::Healthy);
        }

        if let Some(marker) = self
            .artifacts
            .find_marker(task_id, &COMPLETION_MARKERS)
            .await?
        {
            return Ok(HealthVerdict::Completed { marker });
        }

        let log_file = entry.stage().log_file_name();
        let tail = self
            .artifacts
            .tail(task_id, log_file, LOG_TAIL_LINES)
            .await?
            .unwrap_or_default();
        let attempt = current_attempt(&tail);
        if let Some(signal) = self
            .classifier
            .first_signal(attempt.iter().map(String::as_str))
        {
            debug!(task_id = %task_id, kind = %signal.kind, "error signature in stage log");
            return Ok(HealthVerdict::from_log_line(log_file, &signal.line));
        }

        if entry.status() == QueueStatus::Processing
            && let Some(started) = entry.started_at()
        {
            let elapsed = self.clock.utc() - started;
            if elapsed > self.zombie_threshold {
                return Ok(HealthVerdict::timed_out(elapsed.num_minutes()));
            }
        }
        Ok(HealthVerdict::Healthy)
    }

    /// Inspects every waiting and processing row and repairs those the
    /// filesystem contradicts.
    ///
    /// Rows whose directory cannot be read are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`HealthCheckError::Queue`] when the queue store fails.
    pub async fn check_all(&self) -> Result<(u64, Vec<HealthFinding>), HealthCheckError> {
        let rows = self
            .queue
            .list_by_status(&[QueueStatus::Processing, QueueStatus::Waiting])
            .await?;
        let checked = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        let mut findings = Vec::new();
        for entry in rows {
            let verdict = match self.inspect(&entry).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(task_id = %entry.task_id(), error = %err, "task directory unreadable");
                    continue;
                }
            };
            if let Some(finding) = self.repair(entry, verdict).await? {
                findings.push(finding);
            }
        }
        Ok((checked, findings))
    }

    async fn repair(
        &self,
        entry: TaskQueueEntry,
        verdict: HealthVerdict,
    ) -> Result<Option<HealthFinding>, HealthCheckError> {
        let Some(target) = verdict.target_status().filter(|status| *status != entry.status())
        else {
            return Ok(None);
        };
        let repaired = self
            .queue
            .reconcile(
                entry.task_id(),
                entry.status(),
                target,
                verdict.error().map(str::to_owned),
            )
            .await?;
        if repaired {
            info!(
                task_id = %entry.task_id(),
                from = %entry.status(),
                to = %target,
                reason = verdict.error().unwrap_or("completion marker present"),
                "queue row repaired from task directory"
            );
        } else {
            debug!(task_id = %entry.task_id(), "row changed during health check, left alone");
        }
        Ok(Some(HealthFinding {
            entry,
            verdict,
            repaired,
        }))
    }

    /// Runs one pass, converting store failures into unknown counts.
    pub async fn run_pass(&self) -> HealthReport {
        match self.check_all().await {
            Ok((checked, findings)) => {
                let repaired = findings.iter().filter(|finding| finding.repaired).count();
                let report = HealthReport {
                    checked: PassCount::Known(checked),
                    repaired: PassCount::Known(u64::try_from(repaired).unwrap_or(u64::MAX)),
                };
                debug!(checked = %report.checked, repaired = %report.repaired, "health pass finished");
                report
            }
            Err(err) => {
                warn!(error = %err, "health pass skipped, store unreachable");
                HealthReport {
                    checked: PassCount::Unknown,
                    repaired: PassCount::Unknown,
                }
            }
        }
    }
}

fn current_attempt(tail: &[String]) -> &[String] {
    let start = tail
        .iter()
        .rposition(|line| starts_attempt(line))
        .map_or(0, |marker| marker + 1);
    tail.get(start..).unwrap_or_default()
}
