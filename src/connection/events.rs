// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Events published by a connection.

use serde::Serialize;
use serde_json::Value;

use super::state::ConnectionState;

/// Something observable happened on one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        server_id: String,
        from: ConnectionState,
        to: ConnectionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The server's advertised tools were refreshed while Ready.
    #[serde(rename_all = "camelCase")]
    ToolListChanged { server_id: String, tool_count: usize },
    /// A server notification, delivered in arrival order.
    #[serde(rename_all = "camelCase")]
    Notification {
        server_id: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
}

impl ConnectionEvent {
    pub fn server_id(&self) -> &str {
        match self {
            Self::StateChanged { server_id, .. }
            | Self::ToolListChanged { server_id, .. }
            | Self::Notification { server_id, .. } => server_id,
        }
    }

    /// Whether the aggregated tool namespace may have changed.
    pub fn affects_tools(&self) -> bool {
        match self {
            Self::StateChanged { from, to, .. } => from.is_ready() || to.is_ready(),
            Self::ToolListChanged { .. } => true,
            Self::Notification { .. } => false,
        }
    }
}
