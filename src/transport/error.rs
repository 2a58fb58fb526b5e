// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport-level errors.

use thiserror::Error;

/// Failures reported by any transport variant.
///
/// Cloneable so one failure can be fanned out to every pending request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("process exited: {0}")]
    ProcessExited(String),

    #[error("no heartbeat for {0}ms")]
    HeartbeatTimeout(u64),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream ended: {0}")]
    StreamEnded(String),

    #[error("transport closed: {0}")]
    Closed(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connect(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Self::StreamEnded("websocket closed".to_string())
            }
            WsError::Io(e) => Self::Io(e.to_string()),
            other => Self::Io(other.to_string()),
        }
    }
}
