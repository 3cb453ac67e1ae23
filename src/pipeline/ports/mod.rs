//! Port contracts for the pipeline task store.

pub mod repository;

pub use repository::{QueueRepository, QueueRepositoryError, QueueRepositoryResult};
