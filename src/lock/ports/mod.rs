//! Port contracts for stage locks.

pub mod repository;

pub use repository::{StageLockRepository, StageLockRepositoryError, StageLockRepositoryResult};
