//! Health reconciliation service.

mod checker;

pub use checker::{
    DEFAULT_ZOMBIE_THRESHOLD_MINUTES, HealthCheckError, HealthChecker, HealthFinding, HealthReport,
};
