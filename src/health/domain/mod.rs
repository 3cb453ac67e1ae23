//! Domain model for filesystem health reconciliation.

mod classifier;
mod verdict;

pub use classifier::{ErrorKind, LogClassifier, LogSignal, Severity};
pub use verdict::{
    COMPLETION_MARKERS, ERROR_LINE_CHARS, HealthVerdict, LOG_TAIL_LINES, TIMEOUT_PREFIX,
};
