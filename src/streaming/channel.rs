//! Channel types for the handoff pipeline.
//!
//! Producer -> Sink -> Consumer
//! The sink buffers without bound; backpressure is applied on the
//! producer through pull notifications gated by a single-slot demand latch.

use crate::error::StreamError;
use bytes::Bytes;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

/// Item read from a sink: a chunk, or the failure that ended the transfer.
pub type SinkItem = std::result::Result<Bytes, StreamError>;

// =============================================================================
// Sink: producer -> consumer
// =============================================================================

/// Sink write failed because the consumer has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Write half of a transfer's byte sequence.
///
/// Closing drops the sender, which the reader observes as end-of-data once
/// the buffered chunks are drained. Erroring discards whatever is still
/// buffered: the reader's next read fails.
#[derive(Debug)]
pub struct Sink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    failure: Arc<OnceLock<StreamError>>,
}

impl Sink {
    pub fn new() -> (Self, SinkReader) {
        let (tx, rx) = mpsc::unbounded_channel();
        let failure = Arc::new(OnceLock::new());
        let reader = SinkReader {
            rx,
            failure: Arc::clone(&failure),
        };
        (
            Self {
                tx: Some(tx),
                failure,
            },
            reader,
        )
    }

    /// Enqueue a chunk. No-op once the sink has been closed or errored.
    pub fn write(&self, chunk: Bytes) -> std::result::Result<(), SinkClosed> {
        match &self.tx {
            Some(tx) => tx.send(chunk).map_err(|_| SinkClosed),
            None => Ok(()),
        }
    }

    /// Signal end-of-data.
    pub fn close(&mut self) -> std::result::Result<(), SinkClosed> {
        match self.tx.take() {
            Some(tx) if tx.is_closed() => Err(SinkClosed),
            _ => Ok(()),
        }
    }

    /// Fail the consumer's next read, then close.
    pub fn error(&mut self, err: StreamError) -> std::result::Result<(), SinkClosed> {
        match self.tx.take() {
            Some(tx) => {
                // Set before the sender drops so a woken reader sees it.
                let _ = self.failure.set(err);
                if tx.is_closed() {
                    Err(SinkClosed)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }
}

/// Read half of a transfer's sink, owned by the single consumer.
///
/// A failure takes precedence over buffered chunks.
#[derive(Debug)]
pub struct SinkReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
    failure: Arc<OnceLock<StreamError>>,
}

impl SinkReader {
    fn failure(&self) -> Option<SinkItem> {
        self.failure.get().cloned().map(Err)
    }

    /// Wait for the next item. `None` is end-of-data.
    pub async fn recv(&mut self) -> Option<SinkItem> {
        if let Some(failed) = self.failure() {
            return Some(failed);
        }
        match self.rx.recv().await {
            Some(chunk) => Some(self.failure().unwrap_or(Ok(chunk))),
            None => self.failure(),
        }
    }

    /// Read without waiting.
    pub fn try_recv(&mut self) -> std::result::Result<SinkItem, TryRecvError> {
        if let Some(failed) = self.failure() {
            return Ok(failed);
        }
        match self.rx.try_recv() {
            Ok(chunk) => Ok(self.failure().unwrap_or(Ok(chunk))),
            Err(TryRecvError::Disconnected) => self.failure().ok_or(TryRecvError::Disconnected),
            Err(TryRecvError::Empty) => Err(TryRecvError::Empty),
        }
    }

    /// Refuse further chunks; the sink's writes start failing.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

// =============================================================================
// Demand latch: consumer pull -> producer push
// =============================================================================

/// How a pending pull was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullResolution {
    /// A chunk was pushed into the sink.
    Data,
    /// A newer pull replaced this one; no data is attached.
    Superseded,
    /// The transfer closed gracefully.
    EndOfData,
    /// The transfer terminated abnormally.
    Failed,
}

/// Waiting side of a demand latch.
pub type PullTicket = oneshot::Receiver<PullResolution>;

/// Single-slot holder for the outstanding consumer demand.
#[derive(Debug, Default)]
pub struct DemandSlot {
    latch: Option<oneshot::Sender<PullResolution>>,
}

impl DemandSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a new latch. An older latch is released as superseded.
    pub fn arm(&mut self) -> (PullTicket, bool) {
        let superseded = self.resolve(PullResolution::Superseded);
        let (tx, rx) = oneshot::channel();
        self.latch = Some(tx);
        (rx, superseded)
    }

    /// Release the pending latch, if any. Returns whether one was pending.
    pub fn resolve(&mut self, resolution: PullResolution) -> bool {
        match self.latch.take() {
            Some(tx) => {
                // Waiter may have been dropped; nothing to release then.
                let _ = tx.send(resolution);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.latch.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================
