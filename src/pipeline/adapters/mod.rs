//! Adapter implementations for the pipeline task store.

pub mod memory;
pub mod postgres;
