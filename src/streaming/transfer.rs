//! Per-transfer state and lifecycle.
//!
//! ```text
//! Registered --first pull--> Streaming --close--> Closed
//!     |                          |------abort--> Aborted
//!     |                          |------sink failure--> Errored
//!     +--------------------------+------cancel--> CancelledByConsumer
//! ```
//!
//! Abort, cancel and close are accepted from `Registered` as well. Every
//! terminal transition consumes the entry, so a transfer that has left the
//! registry cannot be driven any further.

use crate::error::StreamError;
use crate::streaming::channel::{DemandSlot, PullResolution, PullTicket, Sink, SinkClosed, SinkReader};
use bytes::Bytes;
use std::borrow::Borrow;
use std::fmt;

/// Correlation identifier chosen by the producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(String);

impl TransferId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TransferId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransferId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Delivery metadata, fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferMetadata {
    pub filename: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

impl TransferMetadata {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Registered,
    Streaming,
    Closed,
    Aborted,
    Errored,
    CancelledByConsumer,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Registered | Self::Streaming)
    }

    /// Resolution handed to a pull that is still waiting when this state is entered.
    fn pull_resolution(self) -> PullResolution {
        match self {
            Self::Closed => PullResolution::EndOfData,
            _ => PullResolution::Failed,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registered => "registered",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
            Self::Aborted => "aborted",
            Self::Errored => "errored",
            Self::CancelledByConsumer => "cancelled",
        };
        f.write_str(s)
    }
}

/// Read-only view of a live transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub generation: u64,
    pub metadata: TransferMetadata,
    pub state: TransferState,
    pub demand_pending: bool,
}

/// Outcome of arming demand on a transfer.
pub struct Demand {
    pub ticket: PullTicket,
    /// True only for the pull that moved the transfer into `Streaming`.
    pub first_pull: bool,
}

/// A live transfer, exclusively owned by the registry.
#[derive(Debug)]
pub struct Transfer {
    id: TransferId,
    generation: u64,
    metadata: TransferMetadata,
    state: TransferState,
    demand: DemandSlot,
    sink: Sink,
    reader: Option<SinkReader>,
}

impl Transfer {
    pub(crate) fn new(id: TransferId, generation: u64, metadata: TransferMetadata) -> Self {
        let (sink, reader) = Sink::new();
        Self {
            id,
            generation,
            metadata,
            state: TransferState::Registered,
            demand: DemandSlot::new(),
            sink,
            reader: Some(reader),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            id: self.id.clone(),
            generation: self.generation,
            metadata: self.metadata.clone(),
            state: self.state,
            demand_pending: self.demand.is_pending(),
        }
    }

    /// Hand the read half to the consumer. Yields `None` once taken.
    pub(crate) fn take_reader(&mut self) -> Option<SinkReader> {
        self.reader.take()
    }

    /// Record one unit of consumer demand.
    pub(crate) fn arm_demand(&mut self) -> Demand {
        let first_pull = self.state == TransferState::Registered;
        if first_pull {
            self.state = TransferState::Streaming;
        }
        let (ticket, superseded) = self.demand.arm();
        if superseded {
            tracing::debug!("Transfer {}: pull superseded an unresolved pull", self.id);
        }
        Demand { ticket, first_pull }
    }

    /// Deliver a chunk and release pending demand.
    pub(crate) fn push(&mut self, chunk: Bytes) -> std::result::Result<(), SinkClosed> {
        self.sink.write(chunk)?;
        self.demand.resolve(PullResolution::Data);
        Ok(())
    }

    /// Enter a terminal state, consuming the transfer.
    ///
    /// The pending latch is always released, even when signalling the sink
    /// fails; the failure is returned for the caller to log.
    pub(crate) fn finish(mut self, terminal: TransferState) -> TeardownOutcome {
        debug_assert!(terminal.is_terminal());
        let previous = self.state;
        self.state = terminal;

        let signal = match terminal {
            TransferState::Closed => self.sink.close(),
            TransferState::Aborted => self.sink.error(StreamError::Aborted),
            // The consumer initiated this or is already gone.
            TransferState::CancelledByConsumer | TransferState::Errored => {
                let _ = self.sink.close();
                Ok(())
            }
            TransferState::Registered | TransferState::Streaming => Ok(()),
        };
        self.demand.resolve(terminal.pull_resolution());

        TeardownOutcome {
            id: self.id,
            previous,
            state: terminal,
            signal,
        }
    }

    /// Tear down a transfer displaced by a re-registration of its id.
    pub(crate) fn replace(mut self) -> TeardownOutcome {
        let previous = self.state;
        self.state = TransferState::Errored;
        let signal = self.sink.error(StreamError::Replaced);
        self.demand.resolve(PullResolution::Failed);
        TeardownOutcome {
            id: self.id,
            previous,
            state: TransferState::Errored,
            signal,
        }
    }
}

/// Result of a terminal transition.
#[derive(Debug)]
pub struct TeardownOutcome {
    pub id: TransferId,
    pub previous: TransferState,
    pub state: TransferState,
    pub signal: std::result::Result<(), SinkClosed>,
}

impl TeardownOutcome {
    /// Log-and-continue: a sink that could not be signalled never blocks the transition.
    pub fn contain(self) -> TransferState {
        match self.signal {
            Ok(()) => {
                tracing::debug!(
                    "Transfer {}: {} -> {}",
                    self.id,
                    self.previous,
                    self.state
                );
            }
            Err(SinkClosed) => {
                tracing::warn!(
                    "Transfer {}: consumer gone while signalling {} (was {}), removed anyway",
                    self.id,
                    self.state,
                    self.previous
                );
            }
        }
        self.state
    }
}
