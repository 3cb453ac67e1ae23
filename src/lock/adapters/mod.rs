//! Adapter implementations for stage locks.

pub mod memory;
pub mod postgres;
