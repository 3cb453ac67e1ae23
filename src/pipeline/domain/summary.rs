//! Aggregated queue counts.

use super::{QueueStatus, Stage};
use serde::Serialize;
use std::collections::BTreeMap;

/// Row counts of one stage, split by status. Cancelled rows are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    /// Rows waiting to be claimed.
    pub waiting: u64,
    /// Rows currently claimed.
    pub processing: u64,
    /// Rows that finished the pipeline.
    pub completed: u64,
    /// Rows that failed at this stage.
    pub failed: u64,
}

impl StageCounts {
    /// Adds `count` rows of `status`; cancelled rows are ignored.
    pub const fn add(&mut self, status: QueueStatus, count: u64) {
        match status {
            QueueStatus::Waiting => self.waiting += count,
            QueueStatus::Processing => self.processing += count,
            QueueStatus::Completed => self.completed += count,
            QueueStatus::Failed => self.failed += count,
            QueueStatus::Cancelled => {}
        }
    }

    /// Returns the total of all counted rows.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.waiting + self.processing + self.completed + self.failed
    }
}

/// Per-stage queue counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    stages: BTreeMap<Stage, StageCounts>,
}

impl QueueSummary {
    /// Creates a summary with zero counts for every stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Stage::ALL
                .into_iter()
                .map(|stage| (stage, StageCounts::default()))
                .collect(),
        }
    }

    /// Records `count` rows at `stage` with `status`.
    pub fn record(&mut self, stage: Stage, status: QueueStatus, count: u64) {
        self.stages.entry(stage).or_default().add(status, count);
    }

    /// Returns the counts of `stage`.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> StageCounts {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    /// Iterates stages in pipeline order.
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (Stage, StageCounts)> + '_ {
        self.stages.iter().map(|(stage, counts)| (*stage, *counts))
    }
}
