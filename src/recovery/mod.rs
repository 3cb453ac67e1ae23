//! Crash and zombie recovery.
//!
//! Workers may die without cleaning up. Recovery reconciles what the store
//! claims against which processes are actually alive: claims whose owner is
//! gone go back to their pre-claim state, and locks whose holder is gone or
//! expired are cleared. The worker pool also lives here. It launches
//! detached agent processes for bug claims and tracks them until they exit.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
