//! Reelwright: coordination core of a multi-worker content pipeline.
//!
//! Independent worker processes move tasks through four stages (script,
//! image, video, upload) over a shared `PostgreSQL` store. The crate provides
//! the pieces they cooperate through:
//!
//! - [`pipeline`]: task store and queue with atomic, oldest-first claims
//! - [`lock`]: one exclusive execution lock per stage with timeout takeover
//! - [`worker`]: stage workers driving opaque external generators
//! - [`bug`]: bug records claimed by detached agent workers
//! - [`recovery`]: liveness-based reconciliation and the agent worker pool
//! - [`health`]: queue repair from task directory evidence
//! - [`monitor`]: owned lifecycle running recovery, health, and pool passes
//!
//! # Architecture
//!
//! Each bounded context follows hexagonal architecture:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (`PostgreSQL`,
//!   in-memory, subprocesses, filesystem)
//! - **Services**: Orchestration over ports

pub mod bug;
pub mod clock;
pub mod config;
pub mod health;
pub mod lock;
pub mod monitor;
pub mod persistence;
pub mod pipeline;
pub mod recovery;
pub mod signal;
pub mod telemetry;
pub mod worker;
