//! Unit tests for the pipeline task store.
