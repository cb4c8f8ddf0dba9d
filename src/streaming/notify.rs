//! Outbound notification fan-out.
//!
//! Notifications are broadcast to every listening context; receivers filter
//! by transfer id. The core depends only on [`Notifier`] so the host decides
//! the actual transport.

use crate::streaming::protocol::Notification;
use tokio::sync::broadcast;

/// Subscription handle returned by [`Notifier::subscribe`].
pub type Subscription = broadcast::Receiver<Notification>;

/// Publish/subscribe fan-out for producer-facing notifications.
pub trait Notifier: Send + Sync {
    /// Publish to all current subscribers. Never blocks and never fails:
    /// having no listeners is not an error.
    fn notify(&self, notification: Notification);

    fn subscribe(&self) -> Subscription;
}

/// [`Notifier`] backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        tracing::trace!("Notify: {:?}", notification);
        if self.tx.send(notification).is_err() {
            tracing::trace!("Notification dropped: no subscribers");
        }
    }

    fn subscribe(&self) -> Subscription {
        self.tx.subscribe()
    }
}
