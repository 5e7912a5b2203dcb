use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::backend::DocumentBackend;
use super::worker::run_store_worker;
use super::{EventStore, StoreError};
use crate::models::event::Event;

const QUEUE_DEPTH: usize = 32;

#[derive(Debug)]
pub enum StoreCommand {
    Load {
        reply: oneshot::Sender<Result<Vec<Event>, StoreError>>,
    },
    Save {
        events: Vec<Event>,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Handle to a store whose single worker task owns the backend.
///
/// Commands are applied strictly in arrival order. Dropping every handle
/// stops the worker once the queue drains.
#[derive(Clone)]
pub struct QueuedStore {
    tx: mpsc::Sender<StoreCommand>,
}

impl QueuedStore {
    /// Spawns the writer task. Must be called from inside a tokio runtime.
    pub fn spawn<B: DocumentBackend>(backend: B) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(run_store_worker(rx, backend));
        Self { tx }
    }

    async fn send(&self, command: StoreCommand) -> Result<(), StoreError> {
        self.tx.send(command).await.map_err(|_| StoreError::Closed)
    }
}

#[async_trait]
impl EventStore for QueuedStore {
    async fn load(&self) -> Result<Vec<Event>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Load { reply }).await?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    async fn save(&self, events: &[Event]) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Save {
            events: events.to_vec(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| StoreError::Closed)?
    }
}
