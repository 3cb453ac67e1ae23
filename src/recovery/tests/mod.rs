//! Unit tests for recovery and the worker pool.

mod pool_tests;
