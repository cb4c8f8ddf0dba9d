//! Streaming handoff: relay chunks pushed by a producer over a control
//! channel to a pull-driven consumer, one transfer per correlation id.

pub mod config;
pub mod error;
pub mod server;
pub mod streaming;

pub use config::HandoffConfig;
pub use error::{HandoffError, StreamError};
pub use streaming::StreamHub;
