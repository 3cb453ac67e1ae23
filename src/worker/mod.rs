//! Stage workers and the external generators they drive.
//!
//! A worker serves exactly one stage. Each poll claims at most one task,
//! runs the stage's generator under the stage lock, and then advances or
//! fails the task's queue row. Generators are opaque: the worker only sees
//! an exit code and the captured output.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
