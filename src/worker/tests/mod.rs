//! Unit tests for stage workers and generators.
