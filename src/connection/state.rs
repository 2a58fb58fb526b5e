// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connection lifecycle states.

use serde::{Deserialize, Serialize};

/// Where a connection is in its lifecycle.
///
/// ```text
/// Disconnected -> Connecting -> Ready <-> Degraded
///       ^             |                      |
///       +-------------+        Connecting <--+
/// ```
///
/// `Closed` is terminal and reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No resources held.
    Disconnected,
    /// Transport opening or handshake in progress.
    Connecting,
    /// Accepting calls.
    Ready,
    /// Transport failed; reconnect scheduled.
    Degraded,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, Connecting)
            | (Connecting, Ready)
            | (Connecting, Disconnected)
            | (Ready, Degraded)
            | (Degraded, Connecting) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}
