//! Relay server - carries the handoff protocol over real I/O.
//!
//! Control channel: length-prefixed frames on any ordered byte stream (the
//! `handoff-relay` binary uses stdin for inbound messages and stdout for
//! notifications). Delivery endpoint: an axum router serving
//! `GET /{prefix}/{id}` from the hub and answering 404 for anything it does
//! not own.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;

use crate::streaming::{protocol as wire, Dispatch, PushOutcome, StreamHub, Subscription};

/// Counters for one control session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ControlStats {
    pub frames: u64,
    pub registered: u64,
    pub pushed: u64,
    pub terminated: u64,
    pub ignored: u64,
    pub malformed: u64,
}

/// Read control frames until end of stream, dispatching each to the hub.
///
/// A frame with a known type but an undecodable payload is skipped; framing
/// errors end the session.
pub async fn run_control<R>(hub: &StreamHub, reader: &mut R) -> Result<ControlStats>
where
    R: AsyncRead + Unpin,
{
    let mut stats = ControlStats::default();

    while let Some((msg_type, payload)) = wire::try_read_frame(reader).await? {
        stats.frames += 1;
        match hub.handler().handle_frame(msg_type, payload) {
            Ok(Dispatch::Registered { .. }) => stats.registered += 1,
            Ok(Dispatch::Pushed(PushOutcome::Delivered)) => stats.pushed += 1,
            Ok(Dispatch::Terminated(_)) => stats.terminated += 1,
            Ok(Dispatch::Pushed(_)) | Ok(Dispatch::Ignored) => stats.ignored += 1,
            Err(e) => {
                tracing::warn!("Skipping malformed {:?} frame: {:#}", msg_type, e);
                stats.malformed += 1;
            }
        }
    }

    tracing::debug!("Control channel closed: {:?}", stats);
    Ok(stats)
}

/// Write every notification to `writer` as a frame until the hub goes away.
pub async fn forward_notifications<W>(mut sub: Subscription, mut writer: W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut sent = 0u64;
    loop {
        match sub.recv().await {
            Ok(notification) => {
                let frame = match notification.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Dropping notification for {}: {:#}", notification.id(), e);
                        continue;
                    }
                };
                wire::write_frame(&mut writer, &frame).await?;
                writer.flush().await.context("Failed to flush notifications")?;
                sent += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Notification subscriber lagged, {} dropped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    Ok(sent)
}

/// Router for the delivery endpoint: `GET /{prefix}/{id}`.
///
/// Unknown ids and a second request for an already opened transfer are 404.
pub fn download_router(hub: StreamHub) -> Router {
    let route = format!("/{}/:id", hub.config().route_prefix);
    Router::new().route(&route, get(download)).with_state(hub)
}

async fn download(State(hub): State<StreamHub>, Path(id): Path<String>) -> Response {
    // Fall through: not a registered transfer.
    let Some(delivery) = hub.open(&id) else {
        tracing::debug!("No transfer for {}", id);
        return StatusCode::NOT_FOUND.into_response();
    };

    let headers = delivery.response().headers();
    // A client that disconnects drops the body, which cancels the transfer.
    (headers, Body::from_stream(delivery.into_stream())).into_response()
}

/// Serve downloads until `shutdown` resolves, then wait for in-flight
/// downloads to finish.
pub async fn serve_downloads<F>(hub: StreamHub, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, download_router(hub))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Download server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::streaming::{InboundMessage, Notification, Notifier, TransferMetadata};

    #[tokio::test]
    async fn test_run_control_counts_frames() {
        let hub = StreamHub::default();
        let mut wire_bytes = Vec::new();
        for msg in [
            InboundMessage::RegisterStream {
                id: "A".into(),
                metadata: TransferMetadata::new("f"),
            },
            InboundMessage::PushData {
                id: "A".into(),
                data: Bytes::from_static(b"hello"),
            },
            InboundMessage::PushData {
                id: "nobody".into(),
                data: Bytes::from_static(b"x"),
            },
            InboundMessage::CloseStream { id: "A".into() },
        ] {
            wire_bytes.extend_from_slice(&msg.encode().unwrap());
        }

        let mut reader = wire_bytes.as_slice();
        let stats = run_control(&hub, &mut reader).await.unwrap();
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.pushed, 1);
        assert_eq!(stats.terminated, 1);
        assert_eq!(stats.ignored, 1);
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_run_control_skips_malformed_payload() {
        let hub = StreamHub::default();
        let mut wire_bytes = Vec::new();
        // RegisterStream with an empty payload: valid frame, bad body.
        wire_bytes.extend_from_slice(&0u32.to_be_bytes());
        wire_bytes.push(wire::MessageType::RegisterStream as u8);
        wire_bytes.extend_from_slice(
            &InboundMessage::AbortStream { id: "A".into() }
                .encode()
                .unwrap(),
        );

        let mut reader = wire_bytes.as_slice();
        let stats = run_control(&hub, &mut reader).await.unwrap();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.ignored, 1);
    }

    #[tokio::test]
    async fn test_run_control_rejects_unknown_type() {
        let hub = StreamHub::default();
        let wire_bytes = [0u8, 0, 0, 0, 0x7f];
        let mut reader = &wire_bytes[..];
        assert!(run_control(&hub, &mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_forward_notifications_writes_frames() {
        let hub = StreamHub::default();
        let sub = hub.subscribe();
        let (client, mut server) = tokio::io::duplex(1024);
        let forward = tokio::spawn(forward_notifications(sub, client));

        hub.handler().notifier().notify(Notification::PullData { id: "A".into() });
        let (msg_type, payload) = wire::read_frame(&mut server).await.unwrap();
        assert_eq!(
            Notification::decode(msg_type, payload).unwrap(),
            Notification::PullData { id: "A".into() }
        );

        drop(hub);
        assert_eq!(forward.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forward_skips_unencodable_notification() {
        let hub = StreamHub::default();
        let sub = hub.subscribe();
        let (client, mut server) = tokio::io::duplex(1024);
        let forward = tokio::spawn(forward_notifications(sub, client));

        let notifier = hub.handler().notifier();
        notifier.notify(Notification::StreamAborted {
            id: "A".into(),
            reason: "x".repeat(u16::MAX as usize + 1),
        });
        notifier.notify(Notification::PullData { id: "B".into() });

        let (msg_type, payload) = wire::read_frame(&mut server).await.unwrap();
        assert_eq!(
            Notification::decode(msg_type, payload).unwrap(),
            Notification::PullData { id: "B".into() }
        );
        drop(hub);
        assert_eq!(forward.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forward_drains_queue_after_hub_dropped() {
        let hub = StreamHub::default();
        let sub = hub.subscribe();
        hub.handler().notifier().notify(Notification::StreamAborted {
            id: "A".into(),
            reason: "shutdown".to_string(),
        });
        drop(hub);

        let (client, mut server) = tokio::io::duplex(1024);
        let sent = forward_notifications(sub, client).await.unwrap();
        assert_eq!(sent, 1);

        let (msg_type, payload) = wire::read_frame(&mut server).await.unwrap();
        assert!(matches!(
            Notification::decode(msg_type, payload).unwrap(),
            Notification::StreamAborted { .. }
        ));
    }

    #[tokio::test]
    async fn test_router_uses_configured_prefix() {
        let hub = StreamHub::new(crate::HandoffConfig {
            route_prefix: "dl".to_string(),
            ..Default::default()
        });
        hub.handle(InboundMessage::RegisterStream {
            id: "X".into(),
            metadata: TransferMetadata::new("x.bin"),
        });
        hub.handle(InboundMessage::PushData {
            id: "X".into(),
            data: Bytes::from_static(b"payload"),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_downloads(hub.clone(), listener, std::future::pending()));

        let miss = reqwest::get(format!("http://{}/stream-download/X", addr))
            .await
            .unwrap();
        assert_eq!(miss.status(), reqwest::StatusCode::NOT_FOUND);

        let hit = reqwest::get(format!("http://{}/dl/X", addr)).await.unwrap();
        assert_eq!(hit.status(), reqwest::StatusCode::OK);
        hub.handle(InboundMessage::CloseStream { id: "X".into() });
        assert_eq!(hit.bytes().await.unwrap(), Bytes::from_static(b"payload"));
    }
}
