//! Generator adapters.

pub mod scripted;
pub mod subprocess;

pub use scripted::{ScriptedGenerator, ScriptedStep};
pub use subprocess::{GeneratorCommand, SubprocessGenerator};
