//! Shared wiring of in-memory stores for integration tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use reelwright::bug::{adapters::memory::InMemoryBugRepository, services::BugTracker};
use reelwright::clock::ManualClock;
use reelwright::lock::{
    adapters::memory::InMemoryStageLockRepository, domain::DEFAULT_LOCK_TIMEOUT_SECS,
    services::StageLockService,
};
use reelwright::pipeline::{adapters::memory::InMemoryQueueRepository, services::QueueManager};
use reelwright::recovery::adapters::StaticLiveness;
use rstest::fixture;
use std::sync::Arc;

/// PID the liveness probe always reports as running.
pub const LIVE_PID: u32 = 1;

/// Queue, lock, and bug stores sharing one manual clock.
pub struct Stack {
    /// Queue repository, kept for row counting.
    pub queue_repo: Arc<InMemoryQueueRepository>,
    /// Queue manager over `queue_repo`.
    pub queue: QueueManager<InMemoryQueueRepository, ManualClock>,
    /// Stage lock service.
    pub locks: StageLockService<InMemoryStageLockRepository, ManualClock>,
    /// Bug tracker.
    pub bugs: BugTracker<InMemoryBugRepository, ManualClock>,
    /// Liveness probe where only [`LIVE_PID`] starts out running.
    pub liveness: StaticLiveness,
    /// Shared clock.
    pub clock: Arc<ManualClock>,
}

/// Fixed instant every stack starts at.
///
/// # Panics
///
/// Never; the timestamp is valid.
#[must_use]
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 2, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Provides fresh in-memory stores for each test.
#[fixture]
pub fn stack() -> Stack {
    let clock = Arc::new(ManualClock::new(start_time()));
    let queue_repo = Arc::new(InMemoryQueueRepository::new());
    Stack {
        queue: QueueManager::new(Arc::clone(&queue_repo), Arc::clone(&clock)),
        queue_repo,
        locks: StageLockService::new(
            Arc::new(InMemoryStageLockRepository::new()),
            Arc::clone(&clock),
            Duration::seconds(DEFAULT_LOCK_TIMEOUT_SECS),
        ),
        bugs: BugTracker::new(Arc::new(InMemoryBugRepository::new()), Arc::clone(&clock)),
        liveness: StaticLiveness::with_running([LIVE_PID]),
        clock,
    }
}
