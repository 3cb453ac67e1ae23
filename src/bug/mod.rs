//! Bug records claimed by detached agent workers.
//!
//! Claiming follows the queue pattern: the oldest open row is locked with
//! `SKIP LOCKED`, marked `in_progress`, and stamped with the claimant in its
//! metadata bag.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
