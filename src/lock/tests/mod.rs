//! Unit tests for stage locks.
