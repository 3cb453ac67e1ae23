//! Pipeline task store and queue management.
//!
//! A task moves through script, image, video, and upload on a single queue
//! row. Workers claim rows atomically per stage; a successful stage rewrites
//! the row to the next stage in place, and any failure is terminal until an
//! explicit reopen. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
