//! Domain model for bug records.

mod error;
mod record;
mod status;

pub use error::{BugDomainError, ParseBugStatusError};
pub use record::{BugId, BugMetadata, BugRecord, PersistedBug};
pub use status::BugStatus;
