use tokio::sync::mpsc;

use super::backend::DocumentBackend;
use super::queue::StoreCommand;
use super::{decode_events, encode_events, StoreError};
use crate::models::event::Event;

pub async fn run_store_worker<B: DocumentBackend>(mut rx: mpsc::Receiver<StoreCommand>, backend: B) {
    while let Some(command) = rx.recv().await {
        match command {
            StoreCommand::Load { reply } => {
                let result = load(&backend).await;
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "event store load failed");
                }
                let _ = reply.send(result);
            }
            StoreCommand::Save { events, reply } => {
                let result = save(&backend, &events).await;
                match &result {
                    Ok(()) => tracing::debug!(count = events.len(), "event store saved"),
                    Err(err) => tracing::error!(error = %err, "event store save failed"),
                }
                let _ = reply.send(result);
            }
        }
    }
    tracing::debug!("event store worker stopped");
}

async fn load<B: DocumentBackend>(backend: &B) -> Result<Vec<Event>, StoreError> {
    match backend.read().await? {
        Some(bytes) => decode_events(&bytes),
        None => Ok(Vec::new()),
    }
}

async fn save<B: DocumentBackend>(backend: &B, events: &[Event]) -> Result<(), StoreError> {
    let bytes = encode_events(events)?;
    backend.write(&bytes).await?;
    Ok(())
}
