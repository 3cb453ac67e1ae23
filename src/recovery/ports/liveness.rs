//! Process liveness probe.

/// Answers whether a process id refers to a running process.
///
/// Implementations must treat every probe failure as "not running".
pub trait ProcessLiveness: Send + Sync {
    /// Returns whether `pid` is running.
    fn is_running(&self, pid: u32) -> bool;
}
