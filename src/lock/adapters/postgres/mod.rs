//! `PostgreSQL` adapter for stage locks.

mod repository;
mod schema;

pub use repository::PostgresStageLockRepository;
