//! Platform process probes.

use crate::recovery::ports::ProcessLiveness;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Probes with a zero signal (`kill(pid, 0)`).
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

#[cfg(unix)]
impl ProcessLiveness for SignalProbe {
    fn is_running(&self, pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // 0 addresses the caller's process group, not a process.
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        raw > 0 && kill(Pid::from_raw(raw), None).is_ok()
    }
}

/// Probes by querying `tasklist` for the PID.
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TasklistProbe;

#[cfg(windows)]
impl ProcessLiveness for TasklistProbe {
    fn is_running(&self, pid: u32) -> bool {
        let filter = format!("PID eq {pid}");
        let Ok(output) = std::process::Command::new("tasklist")
            .args(["/FI", filter.as_str(), "/NH"])
            .output()
        else {
            return false;
        };
        let needle = pid.to_string();
        String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .any(|token| token == needle)
    }
}

/// Liveness backed by an explicit set of running PIDs.
#[derive(Debug, Clone, Default)]
pub struct StaticLiveness {
    alive: Arc<Mutex<BTreeSet<u32>>>,
}

impl StaticLiveness {
    /// Creates a probe where exactly `pids` are running.
    #[must_use]
    pub fn with_running(pids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            alive: Arc::new(Mutex::new(pids.into_iter().collect())),
        }
    }

    /// Marks `pid` as running.
    pub fn start(&self, pid: u32) {
        self.alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid);
    }

    /// Marks `pid` as dead.
    pub fn kill(&self, pid: u32) {
        self.alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pid);
    }
}

impl ProcessLiveness for StaticLiveness {
    fn is_running(&self, pid: u32) -> bool {
        self.alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&pid)
    }
}

/// Returns the probe for the current platform.
#[must_use]
pub fn platform_liveness() -> Arc<dyn ProcessLiveness> {
    #[cfg(unix)]
    {
        Arc::new(SignalProbe)
    }
    #[cfg(windows)]
    {
        Arc::new(TasklistProbe)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Arc::new(StaticLiveness::default())
    }
}
