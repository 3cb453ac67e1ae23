//! Liveness probes and agent launchers.

mod launcher;
mod liveness;

pub use launcher::CommandLauncher;
#[cfg(unix)]
pub use liveness::SignalProbe;
#[cfg(windows)]
pub use liveness::TasklistProbe;
pub use liveness::{StaticLiveness, platform_liveness};
