//! Capabilities recovery depends on: process liveness and agent launching.

mod launcher;
mod liveness;

pub use launcher::{LaunchError, LaunchedWorker, WorkerLauncher};
pub use liveness::ProcessLiveness;
