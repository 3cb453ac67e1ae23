//! Unit tests for health reconciliation.

mod checker_tests;
