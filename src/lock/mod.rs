//! Per-stage exclusive execution locks.
//!
//! One lock row exists for every stage. A worker must hold its stage's lock
//! while a generator runs, which caps concurrent executions per stage at one
//! independently of queue row status. A lock older than the timeout counts
//! as abandoned and may be taken over.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
