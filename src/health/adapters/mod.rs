//! Artifact store implementations.

mod directory;
mod memory;

pub use directory::TaskDirectoryStore;
pub use memory::InMemoryArtifactStore;
