//! `PostgreSQL` adapters for the pipeline task store.

mod models;
mod repository;
mod schema;

pub use repository::PostgresQueueRepository;
