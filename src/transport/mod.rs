// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport adapters.
//!
//! Every tool-server is reached through exactly one of four variants:
//!
//! - [`StdioTransport`]: spawned child process, frames over stdin/stdout
//! - [`HttpTransport`]: one POST per outbound frame
//! - [`WebSocketTransport`]: persistent duplex socket with ping/pong heartbeat
//! - [`SseTransport`]: long-lived event stream plus paired POSTs
//!
//! All variants share one contract: [`Transport::open`] returns an open
//! transport, [`Transport::send`] queues one frame, inbound frames and the
//! terminal failure arrive as [`TransportEvent`]s on the channel passed to
//! `open`, and [`Transport::close`] releases every resource.

pub mod error;
pub mod framing;
pub mod http;
pub mod sse;
pub mod stdio;
pub mod websocket;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{BridgeSettings, ServerConfig, StdioFraming, TransportKind};

pub use error::TransportError;
pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use websocket::WebSocketTransport;

/// Capacity of each transport's inbound event channel.
pub const EVENT_BUFFER: usize = 256;

/// Something a transport observed.
#[derive(Debug)]
pub enum TransportEvent {
    /// One inbound frame, delimiters stripped.
    Frame(Vec<u8>),
    /// The transport failed; no further events follow.
    Closed(TransportError),
}

pub type EventSender = mpsc::Sender<TransportEvent>;
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Create the channel a transport reports into.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_BUFFER)
}

/// Timing knobs a transport needs, derived from bridge settings.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub framing: StdioFraming,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub sse_stream_retries: u32,
}

impl TransportSettings {
    pub fn new(config: &ServerConfig, settings: &BridgeSettings) -> Self {
        Self {
            framing: config.framing,
            connect_timeout: settings.startup_timeout(),
            heartbeat_interval: settings.heartbeat_interval(),
            heartbeat_timeout: settings.heartbeat_timeout(),
            sse_stream_retries: settings.sse_stream_retries,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::new(
            &ServerConfig::stdio("default", "true"),
            &BridgeSettings::default(),
        )
    }
}

/// An open transport to one tool-server.
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    WebSocket(WebSocketTransport),
    Sse(SseTransport),
}

impl Transport {
    /// Open the transport described by `config`.
    pub async fn open(
        config: &ServerConfig,
        settings: &TransportSettings,
        events: EventSender,
    ) -> Result<Self, TransportError> {
        let transport = match config.transport_kind {
            TransportKind::Stdio => Self::Stdio(StdioTransport::open(config, settings, events).await?),
            TransportKind::Http => Self::Http(HttpTransport::open(config, settings, events)?),
            TransportKind::WebSocket => {
                Self::WebSocket(WebSocketTransport::open(config, settings, events).await?)
            }
            TransportKind::Sse => Self::Sse(SseTransport::open(config, settings, events).await?),
        };
        Ok(transport)
    }

    /// Queue one frame for delivery.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        match self {
            Self::Stdio(t) => t.send(frame).await,
            Self::Http(t) => t.send(frame),
            Self::WebSocket(t) => t.send(frame).await,
            Self::Sse(t) => t.send(frame),
        }
    }

    /// Release all resources; background tasks stop without emitting events.
    pub async fn close(&self) {
        match self {
            Self::Stdio(t) => t.close().await,
            Self::Http(t) => t.close(),
            Self::WebSocket(t) => t.close(),
            Self::Sse(t) => t.close(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Http(_) => TransportKind::Http,
            Self::WebSocket(_) => TransportKind::WebSocket,
            Self::Sse(_) => TransportKind::Sse,
        }
    }

    /// Whether the server can push unsolicited frames and receive replies to
    /// its own requests. Plain HTTP cannot.
    pub fn supports_server_push(&self) -> bool {
        !matches!(self, Self::Http(_))
    }
}

/// Report a terminal failure unless the transport was closed on purpose.
pub(crate) async fn report_closed(
    events: &EventSender,
    cancel: &tokio_util::sync::CancellationToken,
    error: TransportError,
) {
    if cancel.is_cancelled() {
        return;
    }
    cancel.cancel();
    let _ = events.send(TransportEvent::Closed(error)).await;
}
