//! Port contracts for bug records.

pub mod repository;

pub use repository::{BugRepository, BugRepositoryError, BugRepositoryResult};
