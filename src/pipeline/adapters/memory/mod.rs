//! In-memory adapters for the pipeline task store.

mod queue;

pub use queue::InMemoryQueueRepository;
