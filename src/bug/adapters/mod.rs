//! Adapter implementations for bug records.

pub mod memory;
pub mod postgres;
