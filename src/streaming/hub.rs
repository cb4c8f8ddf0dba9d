//! Handoff hub.
//!
//! Owns the registry and wires the handler, coordinator and delivery adapter
//! to one notifier. Each hub is independent; nothing is global.

use crate::config::HandoffConfig;
use crate::streaming::delivery::{Delivery, DeliveryAdapter};
use crate::streaming::handler::{Dispatch, MessageHandler};
use crate::streaming::notify::{BroadcastNotifier, Notifier, Subscription};
use crate::streaming::protocol::InboundMessage;
use crate::streaming::registry::TransferRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct StreamHub {
    handler: Arc<MessageHandler>,
    delivery: DeliveryAdapter,
    config: Arc<HandoffConfig>,
}

impl StreamHub {
    /// Hub with a broadcast notifier sized from the config.
    pub fn new(config: HandoffConfig) -> Self {
        let notifier = Arc::new(BroadcastNotifier::new(config.notification_capacity));
        Self::with_notifier(config, notifier)
    }

    pub fn with_notifier(config: HandoffConfig, notifier: Arc<dyn Notifier>) -> Self {
        let handler = Arc::new(MessageHandler::new(
            Arc::new(TransferRegistry::new()),
            notifier,
        ));
        let delivery = DeliveryAdapter::new(
            Arc::clone(&handler),
            config.route_prefix.clone(),
            config.default_content_type.clone(),
        );
        Self {
            handler,
            delivery,
            config: Arc::new(config),
        }
    }

    pub fn handle(&self, msg: InboundMessage) -> Dispatch {
        self.handler.handle(msg)
    }

    pub fn handler(&self) -> &Arc<MessageHandler> {
        &self.handler
    }

    pub fn registry(&self) -> &TransferRegistry {
        self.handler.registry()
    }

    pub fn subscribe(&self) -> Subscription {
        self.handler.notifier().subscribe()
    }

    pub fn open(&self, id: &str) -> Option<Delivery> {
        self.delivery.open(id)
    }

    pub fn open_path(&self, path: &str) -> Option<Delivery> {
        self.delivery.open_path(path)
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new(HandoffConfig::default())
    }
}
