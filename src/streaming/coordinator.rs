//! Backpressure coordinator.
//!
//! Bounds the producer's send rate to the consumer's read rate with a
//! single-slot pull protocol (a window of one chunk). The producer lives in
//! another context and cannot be called from a pull, so a pull becomes
//! "notify the producer, then wait for the next push":
//!
//! ```text
//! consumer pull --> arm latch --> PULL_DATA --> producer
//! producer push --> sink.write --> resolve latch --> consumer wakes
//! ```
//!
//! The sink buffers without bound; what is throttled is the stream of pull
//! notifications, not buffering.

use crate::streaming::channel::{PullTicket, SinkClosed};
use crate::streaming::notify::Notifier;
use crate::streaming::protocol::Notification;
use crate::streaming::registry::TransferRegistry;
use crate::streaming::transfer::{Transfer, TransferId, TransferState};
use bytes::Bytes;
use std::sync::Arc;

/// What happened to a pushed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Unknown or already terminated id.
    Ignored,
    /// The consumer went away; the transfer was moved to `Errored`.
    ConsumerGone,
}

pub struct Coordinator {
    registry: Arc<TransferRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl Coordinator {
    pub fn new(registry: Arc<TransferRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        Self { registry, notifier }
    }

    /// Record one unit of consumer demand for a registration.
    ///
    /// Emits STREAM_STARTED on the first pull, then PULL_DATA on every pull.
    /// Returns `None` if the registration is no longer live.
    pub fn on_consumer_pull(&self, id: &str, generation: u64) -> Option<PullTicket> {
        let demand = self
            .registry
            .with_generation(id, generation, Transfer::arm_demand)?;

        let id = TransferId::from(id);
        if demand.first_pull {
            tracing::debug!("Transfer {}: first pull, stream started", id);
            self.notifier
                .notify(Notification::StreamStarted { id: id.clone() });
        }
        self.notifier.notify(Notification::PullData { id });
        Some(demand.ticket)
    }

    /// Deliver a producer chunk, releasing pending demand.
    ///
    /// The chunk is enqueued even when no pull is pending.
    pub fn on_producer_push(&self, id: &str, chunk: Bytes) -> PushOutcome {
        let len = chunk.len();
        let result = self
            .registry
            .with_transfer(id, |t| (t.generation(), t.push(chunk)));

        match result {
            None => {
                tracing::trace!("Ignoring {} byte push for unknown transfer {}", len, id);
                PushOutcome::Ignored
            }
            Some((_, Ok(()))) => PushOutcome::Delivered,
            Some((generation, Err(SinkClosed))) => {
                if let Some(t) = self.registry.remove_generation(id, generation) {
                    t.finish(TransferState::Errored).contain();
                }
                PushOutcome::ConsumerGone
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::channel::PullResolution;
    use crate::streaming::notify::BroadcastNotifier;
    use crate::streaming::transfer::TransferMetadata;

    fn setup() -> (Arc<TransferRegistry>, Arc<BroadcastNotifier>, Coordinator) {
        let registry = Arc::new(TransferRegistry::new());
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let coordinator = Coordinator::new(registry.clone(), notifier.clone());
        (registry, notifier, coordinator)
    }

    #[tokio::test]
    async fn test_started_only_on_first_pull() {
        let (registry, notifier, coordinator) = setup();
        let mut sub = notifier.subscribe();
        let reg = registry.register("A".into(), TransferMetadata::new("f"));

        let _t1 = coordinator.on_consumer_pull("A", reg.generation).unwrap();
        let _t2 = coordinator.on_consumer_pull("A", reg.generation).unwrap();

        let id = TransferId::from("A");
        assert_eq!(
            sub.try_recv().unwrap(),
            Notification::StreamStarted { id: id.clone() }
        );
        assert_eq!(
            sub.try_recv().unwrap(),
            Notification::PullData { id: id.clone() }
        );
        assert_eq!(sub.try_recv().unwrap(), Notification::PullData { id });
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_pull_supersedes_first() {
        let (registry, _notifier, coordinator) = setup();
        let reg = registry.register("A".into(), TransferMetadata::new("f"));

        let first = coordinator.on_consumer_pull("A", reg.generation).unwrap();
        let second = coordinator.on_consumer_pull("A", reg.generation).unwrap();
        assert_eq!(first.await, Ok(PullResolution::Superseded));

        assert_eq!(
            coordinator.on_producer_push("A", Bytes::from_static(b"x")),
            PushOutcome::Delivered
        );
        assert_eq!(second.await, Ok(PullResolution::Data));
    }

    #[test]
    fn test_push_without_demand_is_buffered() {
        let (registry, _notifier, coordinator) = setup();
        registry.register("A".into(), TransferMetadata::new("f"));
        let (_, _, mut reader) = registry.take_reader("A").unwrap();

        assert_eq!(
            coordinator.on_producer_push("A", Bytes::from_static(b"early")),
            PushOutcome::Delivered
        );
        assert_eq!(reader.try_recv().unwrap(), Ok(Bytes::from_static(b"early")));
    }

    #[test]
    fn test_push_unknown_is_ignored() {
        let (_registry, _notifier, coordinator) = setup();
        assert_eq!(
            coordinator.on_producer_push("nope", Bytes::from_static(b"x")),
            PushOutcome::Ignored
        );
    }

    #[test]
    fn test_pull_on_stale_generation() {
        let (registry, _notifier, coordinator) = setup();
        let first = registry.register("A".into(), TransferMetadata::new("f"));
        registry.register("A".into(), TransferMetadata::new("g"));
        assert!(coordinator.on_consumer_pull("A", first.generation).is_none());
        assert!(coordinator.on_consumer_pull("missing", 1).is_none());
    }

    #[test]
    fn test_push_to_dropped_consumer_errors_transfer() {
        let (registry, _notifier, coordinator) = setup();
        registry.register("A".into(), TransferMetadata::new("f"));
        drop(registry.take_reader("A"));

        assert_eq!(
            coordinator.on_producer_push("A", Bytes::from_static(b"x")),
            PushOutcome::ConsumerGone
        );
        assert!(!registry.contains("A"));
        assert_eq!(
            coordinator.on_producer_push("A", Bytes::from_static(b"y")),
            PushOutcome::Ignored
        );
    }
}
