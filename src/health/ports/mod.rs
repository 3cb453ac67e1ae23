//! Port contracts for health reconciliation.

pub mod artifacts;

pub use artifacts::{ArtifactStore, ArtifactStoreError, ArtifactStoreResult};
