//! Filesystem health reconciliation.
//!
//! Task directories are the ground truth for long-running generators: a
//! completion marker means the work finished, an error signature in the
//! current stage's log means it failed, and a row processing for longer than
//! the zombie threshold is abandoned. The checker rewrites queue rows that
//! contradict this evidence with compare-and-set updates.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
