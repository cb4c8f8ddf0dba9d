//! Streaming handoff protocol.
//!
//! Bridges chunks pushed by a producer over a shared control channel to a
//! consumer that reads one continuous byte sequence per transfer.
//!
//! # Architecture
//!
//! ```text
//! producer                      relay                              consumer
//!    |  REGISTER_STREAM  +-----------------+                          |
//!    | ----------------> | MessageHandler  | -- Registry --+          |
//!    |  PUSH_DATA        |   Coordinator   |               |  open    |
//!    | ----------------> |                 | <-- Delivery -+--------- |
//!    |  STREAM_STARTED   |                 |   pull / cancel          |
//!    | <---------------- |    Notifier     |                          |
//!    |  PULL_DATA        +-----------------+                          |
//! ```
//!
//! Transfers are multiplexed by correlation id. Flow control is a
//! single-slot pull: each consumer read with nothing buffered sends one
//! PULL_DATA and waits for the next push.

pub mod channel;
pub mod coordinator;
pub mod delivery;
pub mod handler;
pub mod hub;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod route;
pub mod transfer;

pub use channel::{PullResolution, PullTicket, Sink, SinkReader};
pub use coordinator::{Coordinator, PushOutcome};
pub use delivery::{Delivery, DeliveryAdapter};
pub use handler::{Dispatch, MessageHandler};
pub use hub::StreamHub;
pub use notify::{BroadcastNotifier, Notifier, Subscription};
pub use registry::{Registration, TransferRegistry};
pub use route::{content_disposition, delivery_path, transfer_id_from_path, ResponseMetadata};
pub use transfer::{TransferId, TransferMetadata, TransferSnapshot, TransferState};

pub use protocol::{
    read_frame, try_read_frame, write_frame, InboundMessage, MessageType, Notification,
    RegisterFlags, DEFAULT_CANCEL_REASON, MAX_FRAME_SIZE,
};
