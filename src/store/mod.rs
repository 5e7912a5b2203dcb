//! Durable record of the scheduled events.
//!
//! The store holds exactly one collection. Every save replaces it wholesale;
//! merging happens before the write, in the reconciler or the controller.
//! All reads and writes for one document are funnelled through a single
//! worker task (see [`queue`]), so two saves can never interleave.

pub mod backend;
pub mod queue;
pub mod worker;

use std::io;

use async_trait::async_trait;

use crate::models::event::Event;

pub use backend::{DocumentBackend, FileBackend, MemoryBackend};
pub use queue::QueuedStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("event store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode events: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("stored event document is corrupt: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("event store worker has shut down")]
    Closed,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns the last saved collection, or an empty one if nothing was saved yet.
    async fn load(&self) -> Result<Vec<Event>, StoreError>;

    /// Replaces the whole persisted collection.
    async fn save(&self, events: &[Event]) -> Result<(), StoreError>;
}

pub fn encode_events(events: &[Event]) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(events).map_err(StoreError::Encode)
}

pub fn decode_events(bytes: &[u8]) -> Result<Vec<Event>, StoreError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes).map_err(StoreError::Decode)
}
