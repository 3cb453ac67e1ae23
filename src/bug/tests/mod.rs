//! Unit tests for bug records.
