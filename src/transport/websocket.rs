// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! WebSocket transport.
//!
//! One persistent socket carries calls, replies, and server notifications.
//! A single task owns the socket and multiplexes outbound frames, inbound
//! messages, and a ping/pong heartbeat. Silence longer than the heartbeat
//! timeout is reported as a transport failure.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::TransportError;
use super::{report_closed, EventSender, TransportEvent, TransportSettings};
use crate::config::ServerConfig;

const OUTBOUND_BUFFER: usize = 64;

/// An open WebSocket connection.
pub struct WebSocketTransport {
    outbound: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
}

impl WebSocketTransport {
    /// Connect and start the socket task.
    pub async fn open(
        config: &ServerConfig,
        settings: &TransportSettings,
        events: EventSender,
    ) -> Result<Self, TransportError> {
        let url = config
            .url()
            .ok_or_else(|| TransportError::Connect(format!("server '{}' has no url", config.id)))?;

        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        for (key, value) in config.expanded_headers() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TransportError::Connect(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TransportError::Connect(format!("invalid value for header '{}': {}", key, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _) = tokio::time::timeout(settings.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "timed out after {}ms",
                    settings.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(server = %config.id, url = %url, "WebSocket connected");

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let cancel = CancellationToken::new();
        tokio::spawn(run_socket(
            config.id.clone(),
            ws_stream,
            outbound_rx,
            events,
            cancel.clone(),
            settings.clone(),
        ));

        Ok(Self { outbound, cancel })
    }

    pub async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed("websocket closed".into()));
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed("websocket task stopped".into()))
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_socket<S>(
    server: String,
    mut ws: S,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    events: EventSender,
    cancel: CancellationToken,
    settings: TransportSettings,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let mut heartbeat = interval_at(
        Instant::now() + settings.heartbeat_interval,
        settings.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    let failure = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = ws.close().await;
                debug!(server = %server, "WebSocket closed locally");
                return;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = ws.close().await;
                    return;
                };
                let text = match String::from_utf8(frame) {
                    Ok(text) => text,
                    Err(e) => break TransportError::Send(format!("frame is not UTF-8: {}", e)),
                };
                if let Err(e) = ws.send(WsMessage::Text(text)).await {
                    break TransportError::from(e);
                }
            }
            message = ws.next() => {
                last_seen = Instant::now();
                match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        if events.send(TransportEvent::Frame(text.into_bytes())).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        if events.send(TransportEvent::Frame(bytes)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if let Err(e) = ws.send(WsMessage::Pong(payload)).await {
                            break TransportError::from(e);
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("closed by peer ({}): {}", f.code, f.reason))
                            .unwrap_or_else(|| "closed by peer".to_string());
                        break TransportError::StreamEnded(reason);
                    }
                    Some(Err(e)) => break TransportError::from(e),
                    None => break TransportError::StreamEnded("socket ended".into()),
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= settings.heartbeat_timeout {
                    break TransportError::HeartbeatTimeout(settings.heartbeat_timeout.as_millis() as u64);
                }
                if let Err(e) = ws.send(WsMessage::Ping(Vec::new())).await {
                    break TransportError::from(e);
                }
            }
        }
    };

    warn!(server = %server, "WebSocket failed: {}", failure);
    report_closed(&events, &cancel, failure).await;
}
