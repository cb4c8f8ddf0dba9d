//! Delivery adapter: a registered transfer as a pull-readable byte sequence.
//!
//! The consuming side (the intercepted-response layer) opens a transfer once
//! and reads it chunk by chunk. Each read that finds nothing buffered becomes
//! a pull: the coordinator notifies the producer and the read suspends until
//! the next push, close or abort.

use crate::error::StreamError;
use crate::streaming::channel::{PullResolution, SinkReader};
use crate::streaming::handler::MessageHandler;
use crate::streaming::protocol::DEFAULT_CANCEL_REASON;
use crate::streaming::route::{transfer_id_from_path, ResponseMetadata};
use crate::streaming::transfer::{TransferId, TransferMetadata};
use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;

/// Opens delivery handles for registered transfers.
#[derive(Clone)]
pub struct DeliveryAdapter {
    handler: Arc<MessageHandler>,
    route_prefix: String,
    default_content_type: String,
}

impl DeliveryAdapter {
    pub fn new(
        handler: Arc<MessageHandler>,
        route_prefix: impl Into<String>,
        default_content_type: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            route_prefix: route_prefix.into(),
            default_content_type: default_content_type.into(),
        }
    }

    /// Open the transfer registered under `id`.
    ///
    /// `None` means fall through: nothing is registered, or the single
    /// consumer has already opened it.
    pub fn open(&self, id: &str) -> Option<Delivery> {
        let (generation, metadata, reader) = self.handler.registry().take_reader(id)?;
        tracing::debug!("Transfer {}: delivery opened", id);
        Some(Delivery {
            id: TransferId::from(id),
            generation,
            response: ResponseMetadata::from_metadata(&metadata, &self.default_content_type),
            metadata,
            reader,
            handler: Arc::clone(&self.handler),
            finished: false,
        })
    }

    /// Resolve a request path to a delivery.
    pub fn open_path(&self, path: &str) -> Option<Delivery> {
        let id = transfer_id_from_path(path, &self.route_prefix)?;
        self.open(id.as_str())
    }
}

/// Consumer handle for one transfer.
///
/// Dropping a handle before end-of-data cancels the transfer.
pub struct Delivery {
    id: TransferId,
    generation: u64,
    metadata: TransferMetadata,
    response: ResponseMetadata,
    reader: SinkReader,
    handler: Arc<MessageHandler>,
    finished: bool,
}

impl Delivery {
    pub fn id(&self) -> &TransferId {
        &self.id
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    /// Header values for the synthesized response.
    pub fn response(&self) -> &ResponseMetadata {
        &self.response
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read the next chunk.
    ///
    /// `Ok(None)` is end-of-data. A pull that was superseded by a newer one
    /// returns an empty chunk.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
        if self.finished {
            return Ok(None);
        }

        // Served from the buffer without asking the producer.
        match self.reader.try_recv() {
            Ok(item) => return self.deliver(Some(item)),
            Err(TryRecvError::Disconnected) => return self.deliver(None),
            Err(TryRecvError::Empty) => {}
        }

        let coordinator = self.handler.coordinator();
        let Some(ticket) = coordinator.on_consumer_pull(self.id.as_str(), self.generation) else {
            // Already terminal; the sink reports how it ended.
            let item = self.reader.recv().await;
            return self.deliver(item);
        };

        tokio::select! {
            biased;
            item = self.reader.recv() => self.deliver(item),
            resolution = ticket => match resolution {
                Ok(PullResolution::Superseded) => Ok(Some(Bytes::new())),
                _ => {
                    let item = self.reader.recv().await;
                    self.deliver(item)
                }
            },
        }
    }

    fn deliver(
        &mut self,
        item: Option<Result<Bytes, StreamError>>,
    ) -> Result<Option<Bytes>, StreamError> {
        match item {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => {
                self.finished = true;
                Err(e)
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Read everything until end-of-data.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Abandon the read. Returns whether this ended the transfer.
    pub fn cancel(&mut self, reason: &str) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.reader.close();
        self.handler
            .cancel(self.id.as_str(), self.generation, reason)
    }

    /// Adapt into a [`Stream`] of non-empty chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, StreamError>> + Send {
        futures::stream::unfold(self, |mut delivery| async move {
            loop {
                match delivery.next_chunk().await {
                    Ok(Some(chunk)) if chunk.is_empty() => continue,
                    Ok(Some(chunk)) => return Some((Ok(chunk), delivery)),
                    Ok(None) => return None,
                    Err(e) => return Some((Err(e), delivery)),
                }
            }
        })
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel(DEFAULT_CANCEL_REASON);
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("metadata", &self.metadata)
            .field("finished", &self.finished)
            .finish()
    }
}
