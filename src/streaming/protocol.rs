//! Wire messages for the handoff control channel.
//!
//! Inbound messages flow producer -> relay, notifications flow relay -> every
//! listening producer context. The channel is assumed ordered and reliable;
//! there are no ACKs or checksums.

use crate::streaming::transfer::{TransferId, TransferMetadata};
use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Wire format: all multi-byte integers are big-endian
/// Strings are length-prefixed (u16 len + UTF-8)
/// Frame format: len:u32 | type:u8 | payload
pub const FRAME_HEADER_LEN: usize = 5;

/// Maximum frame size (64MB) - prevents OOM from malicious/corrupted frames
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Reason reported when a consumer cancels without giving one.
pub const DEFAULT_CANCEL_REASON: &str = "User cancelled";

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    RegisterStream = 0x01,
    PushData = 0x02,
    CloseStream = 0x03,
    AbortStream = 0x04,
    StreamStarted = 0x11,
    PullData = 0x12,
    StreamAborted = 0x13,
}

impl MessageType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::RegisterStream),
            0x02 => Some(Self::PushData),
            0x03 => Some(Self::CloseStream),
            0x04 => Some(Self::AbortStream),
            0x11 => Some(Self::StreamStarted),
            0x12 => Some(Self::PullData),
            0x13 => Some(Self::StreamAborted),
            _ => None,
        }
    }

    pub fn is_inbound(self) -> bool {
        (self as u8) < 0x10
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegisterFlags: u8 {
        const HAS_CONTENT_TYPE = 1 << 0;
        const HAS_SIZE = 1 << 1;
    }
}

// =============================================================================
// Field helpers
// =============================================================================

/// Wire length of a string field, rejecting values the u16 prefix cannot carry.
fn str_wire_len(s: &str, field: &str) -> Result<usize> {
    if s.len() > u16::MAX as usize {
        anyhow::bail!(
            "{} is {} bytes, exceeds maximum {}",
            field,
            s.len(),
            u16::MAX
        );
    }
    Ok(2 + s.len())
}

/// Caller must have checked the length with [`str_wire_len`].
fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_str(payload: &mut Bytes, field: &str) -> Result<String> {
    if payload.remaining() < 2 {
        anyhow::bail!("{} length truncated", field);
    }
    let len = payload.get_u16() as usize;
    if payload.remaining() < len {
        anyhow::bail!(
            "{} truncated: expected {} bytes, got {}",
            field,
            len,
            payload.remaining()
        );
    }
    String::from_utf8(payload.copy_to_bytes(len).to_vec())
        .with_context(|| format!("Invalid UTF-8 in {}", field))
}

fn get_id(payload: &mut Bytes) -> Result<TransferId> {
    get_str(payload, "transfer id").map(TransferId::from)
}

fn frame(msg_type: MessageType, payload_len: usize) -> Result<BytesMut> {
    if payload_len > MAX_FRAME_SIZE as usize {
        anyhow::bail!(
            "{:?} payload of {} bytes exceeds maximum frame size {}",
            msg_type,
            payload_len,
            MAX_FRAME_SIZE
        );
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload_len);
    buf.put_u32(payload_len as u32);
    buf.put_u8(msg_type as u8);
    Ok(buf)
}

// =============================================================================
// Inbound: producer -> relay
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    RegisterStream {
        id: TransferId,
        metadata: TransferMetadata,
    },
    PushData {
        id: TransferId,
        data: Bytes,
    },
    CloseStream {
        id: TransferId,
    },
    AbortStream {
        id: TransferId,
    },
}

impl InboundMessage {
    pub fn id(&self) -> &TransferId {
        match self {
            Self::RegisterStream { id, .. }
            | Self::PushData { id, .. }
            | Self::CloseStream { id }
            | Self::AbortStream { id } => id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::RegisterStream { .. } => MessageType::RegisterStream,
            Self::PushData { .. } => MessageType::PushData,
            Self::CloseStream { .. } => MessageType::CloseStream,
            Self::AbortStream { .. } => MessageType::AbortStream,
        }
    }

    /// Encode as a complete frame.
    ///
    /// Fails for string fields longer than 65535 bytes and for frames larger
    /// than [`MAX_FRAME_SIZE`], which the reading side would reject.
    pub fn encode(&self) -> Result<Bytes> {
        let id = self.id().as_str();
        let id_len = str_wire_len(id, "transfer id")?;
        let encoded = match self {
            Self::RegisterStream { metadata, .. } => {
                let mut flags = RegisterFlags::empty();
                let mut payload_len = id_len + 1 + str_wire_len(&metadata.filename, "filename")?;
                if let Some(ct) = &metadata.content_type {
                    flags |= RegisterFlags::HAS_CONTENT_TYPE;
                    payload_len += str_wire_len(ct, "content type")?;
                }
                if metadata.size.is_some() {
                    flags |= RegisterFlags::HAS_SIZE;
                    payload_len += 8;
                }

                let mut buf = frame(MessageType::RegisterStream, payload_len)?;
                put_str(&mut buf, id);
                buf.put_u8(flags.bits());
                put_str(&mut buf, &metadata.filename);
                if let Some(ct) = &metadata.content_type {
                    put_str(&mut buf, ct);
                }
                if let Some(size) = metadata.size {
                    buf.put_u64(size);
                }
                buf.freeze()
            }
            Self::PushData { data, .. } => {
                let mut buf = frame(MessageType::PushData, id_len + data.len())?;
                put_str(&mut buf, id);
                buf.put_slice(data);
                buf.freeze()
            }
            Self::CloseStream { .. } | Self::AbortStream { .. } => {
                let mut buf = frame(self.message_type(), id_len)?;
                put_str(&mut buf, id);
                buf.freeze()
            }
        };
        Ok(encoded)
    }

    /// Decode a frame payload (header already stripped).
    pub fn decode(msg_type: MessageType, mut payload: Bytes) -> Result<Self> {
        let id = get_id(&mut payload)?;
        match msg_type {
            MessageType::RegisterStream => {
                if payload.remaining() < 1 {
                    anyhow::bail!("RegisterStream flags truncated");
                }
                let flags = RegisterFlags::from_bits_truncate(payload.get_u8());
                let filename = get_str(&mut payload, "filename")?;
                let content_type = if flags.contains(RegisterFlags::HAS_CONTENT_TYPE) {
                    Some(get_str(&mut payload, "content type")?)
                } else {
                    None
                };
                let size = if flags.contains(RegisterFlags::HAS_SIZE) {
                    if payload.remaining() < 8 {
                        anyhow::bail!("RegisterStream size truncated");
                    }
                    Some(payload.get_u64())
                } else {
                    None
                };
                Ok(Self::RegisterStream {
                    id,
                    metadata: TransferMetadata {
                        filename,
                        content_type,
                        size,
                    },
                })
            }
            // The chunk is the rest of the frame; no copy.
            MessageType::PushData => Ok(Self::PushData { id, data: payload }),
            MessageType::CloseStream => Ok(Self::CloseStream { id }),
            MessageType::AbortStream => Ok(Self::AbortStream { id }),
            other => anyhow::bail!("{:?} is not an inbound message", other),
        }
    }
}

// =============================================================================
// Outbound: relay -> all producer contexts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// First consumer pull for a transfer.
    StreamStarted { id: TransferId },
    /// Consumer is ready for one more chunk.
    PullData { id: TransferId },
    /// Consumer abandoned the read.
    StreamAborted { id: TransferId, reason: String },
}

impl Notification {
    pub fn id(&self) -> &TransferId {
        match self {
            Self::StreamStarted { id } | Self::PullData { id } | Self::StreamAborted { id, .. } => {
                id
            }
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::StreamStarted { .. } => MessageType::StreamStarted,
            Self::PullData { .. } => MessageType::PullData,
            Self::StreamAborted { .. } => MessageType::StreamAborted,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let id = self.id().as_str();
        let id_len = str_wire_len(id, "transfer id")?;
        let encoded = match self {
            Self::StreamAborted { reason, .. } => {
                let mut buf = frame(
                    MessageType::StreamAborted,
                    id_len + str_wire_len(reason, "abort reason")?,
                )?;
                put_str(&mut buf, id);
                put_str(&mut buf, reason);
                buf.freeze()
            }
            _ => {
                let mut buf = frame(self.message_type(), id_len)?;
                put_str(&mut buf, id);
                buf.freeze()
            }
        };
        Ok(encoded)
    }

    pub fn decode(msg_type: MessageType, mut payload: Bytes) -> Result<Self> {
        let id = get_id(&mut payload)?;
        match msg_type {
            MessageType::StreamStarted => Ok(Self::StreamStarted { id }),
            MessageType::PullData => Ok(Self::PullData { id }),
            MessageType::StreamAborted => {
                let reason = get_str(&mut payload, "abort reason")?;
                Ok(Self::StreamAborted { id, reason })
            }
            other => anyhow::bail!("{:?} is not a notification", other),
        }
    }
}

// =============================================================================
// Frame reading/writing
// =============================================================================

/// Read a single frame from the stream.
/// Returns (message_type, payload).
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<(MessageType, Bytes)> {
    let len = r.read_u32().await.context("Failed to read frame length")?;
    read_frame_body(r, len).await
}

/// Like [`read_frame`], but a clean end of stream before a new frame yields `None`.
pub async fn try_read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<Option<(MessageType, Bytes)>> {
    let len = match r.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read frame length"),
    };
    read_frame_body(r, len).await.map(Some)
}

async fn read_frame_body<R: AsyncRead + Unpin>(
    r: &mut R,
    len: u32,
) -> Result<(MessageType, Bytes)> {
    // Validate frame size before allocation
    if len > MAX_FRAME_SIZE {
        anyhow::bail!(
            "Frame size {} exceeds maximum allowed size {}",
            len,
            MAX_FRAME_SIZE
        );
    }

    let msg_type = r.read_u8().await.context("Failed to read message type")?;
    let msg_type = MessageType::from_u8(msg_type)
        .with_context(|| format!("Unknown message type 0x{:02x}", msg_type))?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)
        .await
        .context("Failed to read frame payload")?;

    Ok((msg_type, Bytes::from(payload)))
}

/// Write a pre-encoded frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Bytes) -> Result<()> {
    w.write_all(frame).await.context("Failed to write frame")?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
