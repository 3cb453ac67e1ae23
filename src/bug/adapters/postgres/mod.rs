//! `PostgreSQL` adapter for bug records.

mod repository;
mod schema;

pub use repository::PostgresBugRepository;
