//! Worker pool: launches detached agents for open bugs and tracks them.

use crate::bug::{
    domain::{BugId, BugRecord, BugStatus},
    ports::BugRepository,
    services::{BugTracker, BugTrackerError},
};
use crate::recovery::{
    domain::{TrackedStatus, TrackedWorker, WorkerId},
    ports::{LaunchedWorker, ProcessLiveness, WorkerLauncher},
};
use chrono::{DateTime, Duration, Utc};
use mockable::Clock;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// Tunables of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Upper bound on tracked workers across all kinds.
    pub max_workers: usize,
    /// How long a launch may take before it counts as failed.
    pub spawn_timeout: std::time::Duration,
    /// Workers younger than this are never liveness-checked.
    pub min_worker_age: Duration,
    /// Consecutive spawn failures that disable a launcher kind.
    pub max_consecutive_failures: u32,
    /// How long a disabled kind stays disabled.
    pub disable_for: Duration,
    /// PID recorded on a bug by the claim itself, until the agent's PID
    /// replaces it.
    pub pool_pid: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_workers: 10,
            spawn_timeout: std::time::Duration::from_secs(30),
            min_worker_age: Duration::seconds(30),
            max_consecutive_failures: 3,
            disable_for: Duration::minutes(5),
            pool_pid: std::process::id(),
        }
    }
}

/// Errors from pool operations.
#[derive(Debug, Error)]
pub enum WorkerPoolError {
    /// Bug store failed.
    #[error(transparent)]
    Bug(#[from] BugTrackerError),
}

/// Result of one [`WorkerPool::dispatch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The pool is at capacity.
    Full,
    /// Every launcher kind is disabled or at its own capacity.
    NoLauncher,
    /// No bug is open.
    NoWork,
    /// An agent is running for the bug.
    Spawned {
        /// Tracked worker.
        worker_id: WorkerId,
        /// Claimed bug.
        bug_id: BugId,
        /// Agent process id.
        pid: u32,
    },
    /// The agent started but the claim had already been taken from the
    /// pool, so the agent is not tracked.
    ClaimLost {
        /// Worker that was being launched.
        worker_id: WorkerId,
        /// Bug whose claim was lost.
        bug_id: BugId,
        /// Agent process id.
        pid: u32,
    },
    /// The launch failed and the claim was rolled back.
    SpawnFailed {
        /// Worker that was being launched.
        worker_id: WorkerId,
        /// Bug returned to open.
        bug_id: BugId,
        /// Failure description.
        reason: String,
    },
}

/// How an exit event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitHandling {
    /// The worker is not tracked.
    Untracked,
    /// The worker is running detached; exit events are not trusted.
    Ignored,
    /// The worker exited while spawning; its bug was released.
    SpawnFailed,
}

struct Slot {
    worker: TrackedWorker,
    exit: Option<oneshot::Receiver<Option<i32>>>,
}

#[derive(Default)]
struct PoolState {
    next_id: u64,
    slots: BTreeMap<WorkerId, Slot>,
    failures: BTreeMap<String, u32>,
    disabled_until: BTreeMap<String, DateTime<Utc>>,
}

impl PoolState {
    fn count_of(&self, kind: &str) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.worker.kind == kind)
            .count()
    }

    fn is_disabled(&mut self, kind: &str, now: DateTime<Utc>) -> bool {
        let Some(until) = self.disabled_until.get(kind).copied() else {
            return false;
        };
        if until > now {
            return true;
        }
        self.disabled_until.remove(kind);
        self.failures.insert(kind.to_owned(), 0);
        info!(kind, "launcher kind re-enabled");
        false
    }
}

/// Launches and tracks detached agent workers for bug claims.
pub struct WorkerPool<B, C>
where
    B: BugRepository,
    C: Clock + Send + Sync,
{
    bugs: BugTracker<B, C>,
    launchers: Vec<Arc<dyn WorkerLauncher>>,
    liveness: Arc<dyn ProcessLiveness>,
    clock: Arc<C>,
    settings: PoolSettings,
    state: Mutex<PoolState>,
}

impl<B, C> WorkerPool<B, C>
where
    B: BugRepository,
    C: Clock + Send + Sync,
{
    /// Creates a pool. Launchers are tried in order.
    #[must_use]
    pub fn new(
        bugs: BugTracker<B, C>,
        launchers: Vec<Arc<dyn WorkerLauncher>>,
        liveness: Arc<dyn ProcessLiveness>,
        clock: Arc<C>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            bugs,
            launchers,
            liveness,
            clock,
            settings,
            state: Mutex::new(PoolState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of tracked workers.
    #[must_use]
    pub fn workers(&self) -> Vec<TrackedWorker> {
        self.state()
            .slots
            .values()
            .map(|slot| slot.worker.clone())
            .collect()
    }

    /// Returns whether launcher `kind` is currently disabled.
    #[must_use]
    pub fn is_disabled(&self, kind: &str) -> bool {
        let now = self.clock.utc();
        self.state().is_disabled(kind, now)
    }

    fn available_launcher(&self) -> Option<Arc<dyn WorkerLauncher>> {
        let now = self.clock.utc();
        let mut state = self.state();
        self.launchers
            .iter()
            .find(|launcher| {
                let kind = launcher.kind();
                !state.is_disabled(kind, now) && state.count_of(kind) < launcher.capacity()
            })
            .map(Arc::clone)
    }

    /// Claims the oldest open bug and launches an agent for it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerPoolError`] when the bug store fails.
    pub async fn dispatch(&self) -> Result<DispatchOutcome, WorkerPoolError> {
        if self.state().slots.len() >= self.settings.max_workers {
            return Ok(DispatchOutcome::Full);
        }
        let Some(launcher) = self.available_launcher() else {
            return Ok(DispatchOutcome::NoLauncher);
        };
        let kind = launcher.kind().to_owned();
        let Some(bug) = self
            .bugs
            .claim_next(&kind, self.settings.pool_pid)
            .await?
        else {
            return Ok(DispatchOutcome::NoWork);
        };
        let worker_id = self.register(&kind, &bug);

        let launched =
            tokio::time::timeout(self.settings.spawn_timeout, launcher.launch(&bug)).await;
        let reason = match launched {
            Ok(Ok(agent)) => return self.mark_running(worker_id, &bug, agent).await,
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("spawn timed out after {:?}", self.settings.spawn_timeout),
        };
        self.handle_spawn_failure(worker_id, &kind, bug.id(), &reason)
            .await?;
        Ok(DispatchOutcome::SpawnFailed {
            worker_id,
            bug_id: bug.id(),
            reason,
        })
    }

    fn register(&self, kind: &str, bug: &BugRecord) -> WorkerId {
        let mut state = self.state();
        state.next_id += 1;
        let worker_id = WorkerId::new(state.next_id);
        state.slots.insert(
            worker_id,
            Slot {
                worker: TrackedWorker {
                    id: worker_id,
                    kind: kind.to_owned(),
                    bug_id: bug.id(),
                    spawned_at: self.clock.utc(),
                    pid: None,
                    status: TrackedStatus::Spawning,
                },
                exit: None,
            },
        );
        info!(worker_id = %worker_id, kind, bug_id = %bug.id(), "spawning agent worker");
        worker_id
    }

    async fn mark_running(
        &self,
        worker_id: WorkerId,
        bug: &BugRecord,
        agent: LaunchedWorker,
    ) -> Result<DispatchOutcome, WorkerPoolError> {
        let LaunchedWorker { pid, exit } = agent;
        let tracked = {
            let mut state = self.state();
            let kind = state.slots.get_mut(&worker_id).map(|slot| {
                slot.worker.status = TrackedStatus::Running;
                slot.worker.pid = Some(pid);
                slot.exit = exit;
                slot.worker.kind.clone()
            });
            if let Some(kind_name) = &kind {
                state.failures.insert(kind_name.clone(), 0);
            }
            kind.is_some()
        };
        if !tracked {
            warn!(worker_id = %worker_id, pid, "agent launched after its slot was dropped");
            return Ok(DispatchOutcome::SpawnFailed {
                worker_id,
                bug_id: bug.id(),
                reason: "agent exited while spawning".to_owned(),
            });
        }
        if !self
            .bugs
            .attach_worker(bug.id(), self.settings.pool_pid, pid)
            .await?
        {
            self.state().slots.remove(&worker_id);
            warn!(worker_id = %worker_id, bug_id = %bug.id(), pid, "bug claim lost before the agent was recorded");
            return Ok(DispatchOutcome::ClaimLost {
                worker_id,
                bug_id: bug.id(),
                pid,
            });
        }
        info!(worker_id = %worker_id, bug_id = %bug.id(), pid, "agent worker running");
        Ok(DispatchOutcome::Spawned {
            worker_id,
            bug_id: bug.id(),
            pid,
        })
    }

    async fn handle_spawn_failure(
        &self,
        worker_id: WorkerId,
        kind: &str,
        bug_id: BugId,
        reason: &str,
    ) -> Result<(), WorkerPoolError> {
        warn!(worker_id = %worker_id, kind, bug_id = %bug_id, reason, "agent spawn failed");
        let pool_pid = self.settings.pool_pid;
        self.bugs
            .release(bug_id, Some(pool_pid), &format!("spawn failed: {reason}"))
            .await?;

        let now = self.clock.utc();
        let mut state = self.state();
        state.slots.remove(&worker_id);
        let failures = state.failures.entry(kind.to_owned()).or_insert(0);
        *failures += 1;
        if *failures >= self.settings.max_consecutive_failures {
            let count = *failures;
            state
                .disabled_until
                .insert(kind.to_owned(), now + self.settings.disable_for);
            warn!(kind, failures = count, "launcher kind disabled after consecutive failures");
        }
        Ok(())
    }

    /// Handles an exit event of a tracked worker.
    ///
    /// A detached process may report an exit right after launch while it
    /// keeps running, so events for running workers are ignored; liveness
    /// is left to [`Self::cleanup_dead_workers`]. An exit while spawning is
    /// a genuine spawn failure: the bug is released and the slot cleared.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerPoolError`] when the bug store fails.
    pub async fn handle_worker_exit(
        &self,
        worker_id: WorkerId,
        exit_code: Option<i32>,
    ) -> Result<ExitHandling, WorkerPoolError> {
        let slot = {
            let mut state = self.state();
            let Some(status) = state.slots.get(&worker_id).map(|slot| slot.worker.status) else {
                return Ok(ExitHandling::Untracked);
            };
            if status == TrackedStatus::Running {
                debug!(worker_id = %worker_id, exit_code = ?exit_code, "exit of detached worker ignored");
                return Ok(ExitHandling::Ignored);
            }
            state.slots.remove(&worker_id)
        };
        if let Some(removed) = slot {
            warn!(worker_id = %worker_id, exit_code = ?exit_code, "agent exited while spawning");
            self.bugs
                .release(
                    removed.worker.bug_id,
                    Some(self.settings.pool_pid),
                    "agent exited while spawning",
                )
                .await?;
        }
        Ok(ExitHandling::SpawnFailed)
    }

    /// Delivers exit events that launchers have reported since the last
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerPoolError`] when the bug store fails.
    pub async fn collect_exits(&self) -> Result<usize, WorkerPoolError> {
        let exited: Vec<(WorkerId, Option<i32>)> = {
            let mut state = self.state();
            state
                .slots
                .iter_mut()
                .filter_map(|(id, slot)| {
                    let receiver = slot.exit.as_mut()?;
                    match receiver.try_recv() {
                        Ok(code) => {
                            slot.exit = None;
                            Some((*id, code))
                        }
                        Err(TryRecvError::Empty) => None,
                        Err(TryRecvError::Closed) => {
                            slot.exit = None;
                            None
                        }
                    }
                })
                .collect()
        };
        for (worker_id, code) in &exited {
            self.handle_worker_exit(*worker_id, *code).await?;
        }
        Ok(exited.len())
    }

    /// Removes running workers whose process is gone.
    ///
    /// Workers younger than the minimum age are skipped. A bug that is no
    /// longer in progress only clears the slot. When the bug records a
    /// different live PID, that process took over and the slot adopts it.
    /// Otherwise, when neither PID is alive, the bug is released.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerPoolError`] when the bug store fails.
    pub async fn cleanup_dead_workers(&self) -> Result<u64, WorkerPoolError> {
        let now = self.clock.utc();
        let candidates: Vec<TrackedWorker> = self
            .workers()
            .into_iter()
            .filter(|worker| {
                worker.status == TrackedStatus::Running
                    && worker.pid.is_some()
                    && worker.is_older_than(now, self.settings.min_worker_age)
            })
            .collect();

        let mut removed = 0;
        for worker in candidates {
            if self.reap(&worker).await? {
                self.state().slots.remove(&worker.id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn reap(&self, worker: &TrackedWorker) -> Result<bool, WorkerPoolError> {
        let bug = self.bugs.find(worker.bug_id).await?;
        let recorded = bug.as_ref().and_then(BugRecord::worker_pid);
        let in_progress = bug
            .as_ref()
            .is_some_and(|current| current.status() == BugStatus::InProgress);
        if !in_progress || recorded.is_none() {
            debug!(worker_id = %worker.id, bug_id = %worker.bug_id, "bug finished, slot cleared");
            return Ok(true);
        }

        if let Some(other) = recorded.filter(|pid| Some(*pid) != worker.pid)
            && self.liveness.is_running(other)
        {
            info!(worker_id = %worker.id, pid = other, "bug taken over by another process");
            if let Some(slot) = self.state().slots.get_mut(&worker.id) {
                slot.worker.pid = Some(other);
            }
            return Ok(false);
        }

        let tracked_alive = worker.pid.is_some_and(|pid| self.liveness.is_running(pid));
        if tracked_alive {
            return Ok(false);
        }
        warn!(worker_id = %worker.id, pid = ?worker.pid, bug_id = %worker.bug_id, "agent worker died");
        self.bugs
            .release(worker.bug_id, recorded, "agent process exited")
            .await?;
        Ok(true)
    }

    /// Releases the bug of every tracked worker and forgets them.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerPoolError`] when the bug store fails.
    pub async fn shutdown(&self) -> Result<u64, WorkerPoolError> {
        let slots = std::mem::take(&mut self.state().slots);
        let mut released = 0;
        for slot in slots.into_values() {
            let owner = slot.worker.pid.unwrap_or(self.settings.pool_pid);
            if self
                .bugs
                .release(slot.worker.bug_id, Some(owner), "worker pool shutdown")
                .await?
            {
                released += 1;
            }
        }
        if released > 0 {
            info!(released, "bugs released on pool shutdown");
        }
        Ok(released)
    }
}
