//! Step definitions for pipeline BDD scenarios.

mod given;
mod then;
mod when;
pub mod world;
