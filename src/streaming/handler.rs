//! Message protocol handler.
//!
//! Decodes inbound control messages and drives the transfer state machine.
//! Every handler runs to completion; none of them suspend.
//!
//! | Message          | Effect                                   | Unknown id |
//! |------------------|------------------------------------------|------------|
//! | REGISTER_STREAM  | create in `Registered` (overwrite reuse) | -          |
//! | PUSH_DATA        | deliver via the coordinator              | ignored    |
//! | CLOSE_STREAM     | end-of-data to consumer, remove          | ignored    |
//! | ABORT_STREAM     | read failure to consumer, remove         | ignored    |

use crate::streaming::coordinator::{Coordinator, PushOutcome};
use crate::streaming::notify::Notifier;
use crate::streaming::protocol::{InboundMessage, MessageType, Notification};
use crate::streaming::registry::TransferRegistry;
use crate::streaming::transfer::{TransferId, TransferMetadata, TransferState};
use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;

/// What a dispatched message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Registered { generation: u64, replaced: bool },
    Pushed(PushOutcome),
    Terminated(TransferState),
    Ignored,
}

pub struct MessageHandler {
    registry: Arc<TransferRegistry>,
    coordinator: Coordinator,
    notifier: Arc<dyn Notifier>,
}

impl MessageHandler {
    pub fn new(registry: Arc<TransferRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        let coordinator = Coordinator::new(registry.clone(), notifier.clone());
        Self {
            registry,
            coordinator,
            notifier,
        }
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Process a raw frame from the control channel.
    pub fn handle_frame(&self, msg_type: MessageType, payload: Bytes) -> Result<Dispatch> {
        if !msg_type.is_inbound() {
            tracing::debug!("Ignoring outbound message {:?} on control channel", msg_type);
            return Ok(Dispatch::Ignored);
        }
        let msg = InboundMessage::decode(msg_type, payload)?;
        Ok(self.handle(msg))
    }

    /// Process a decoded control message.
    pub fn handle(&self, msg: InboundMessage) -> Dispatch {
        match msg {
            InboundMessage::RegisterStream { id, metadata } => self.register(id, metadata),
            InboundMessage::PushData { id, data } => {
                Dispatch::Pushed(self.coordinator.on_producer_push(id.as_str(), data))
            }
            InboundMessage::CloseStream { id } => self.terminate(&id, TransferState::Closed),
            InboundMessage::AbortStream { id } => self.terminate(&id, TransferState::Aborted),
        }
    }

    fn register(&self, id: TransferId, metadata: TransferMetadata) -> Dispatch {
        tracing::debug!(
            "Transfer {}: register {:?} ({:?}, {:?} bytes)",
            id,
            metadata.filename,
            metadata.content_type,
            metadata.size
        );
        let registration = self.registry.register(id, metadata);
        let replaced = match registration.replaced {
            Some(outcome) => {
                tracing::debug!("Transfer {}: replaced by re-registration", outcome.id);
                outcome.contain();
                true
            }
            None => false,
        };
        Dispatch::Registered {
            generation: registration.generation,
            replaced,
        }
    }

    /// Producer-driven terminal transition: close or abort.
    fn terminate(&self, id: &TransferId, state: TransferState) -> Dispatch {
        match self.registry.remove(id.as_str()) {
            Some(t) => Dispatch::Terminated(t.finish(state).contain()),
            None => {
                tracing::trace!("Ignoring {} for unknown transfer {}", state, id);
                Dispatch::Ignored
            }
        }
    }

    /// Consumer abandoned the read of a registration.
    ///
    /// Emits STREAM_ABORTED only if this call actually ended the transfer;
    /// repeats and races with close are no-ops.
    pub fn cancel(&self, id: &str, generation: u64, reason: &str) -> bool {
        let Some(t) = self.registry.remove_generation(id, generation) else {
            tracing::trace!("Cancel for finished transfer {} ignored", id);
            return false;
        };
        t.finish(TransferState::CancelledByConsumer).contain();
        self.notifier.notify(Notification::StreamAborted {
            id: TransferId::from(id),
            reason: reason.to_string(),
        });
        true
    }

    /// Abort every live transfer. Used when the control channel is gone and
    /// no producer remains to finish them.
    pub fn abort_all(&self) -> usize {
        let ids = self.registry.ids();
        ids.iter()
            .filter(|id| {
                matches!(
                    self.terminate(id, TransferState::Aborted),
                    Dispatch::Terminated(_)
                )
            })
            .count()
    }
}
