// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Toolbridge - connect an agent to pluggable tool-servers.
//!
//! The bridge lets an agent call tools exposed by independent tool-servers
//! reachable over a spawned process (stdio), HTTP, WebSocket, or SSE. Every
//! call passes a per-server policy gate before anything is sent.
//!
//! # Architecture
//!
//! Leaf to root:
//!
//! - [`protocol`] - JSON-RPC 2.0 envelopes and bridge-wide correlation ids
//! - [`transport`] - the four transport variants behind one closed enum
//! - [`connection`] - per-server state machine, reader loop, reconnect backoff
//! - [`registry`] - owner of every server config and its connection
//! - [`aggregator`] - merged tool namespace over Ready connections
//! - [`security`] - the policy gate
//! - [`dispatcher`] - resolve, validate, send, await
//! - [`bridge`] - the facade handed to the agent
//!
//! Supporting modules: [`config`], [`error`], [`telemetry`], [`types`].
//!
//! # Example
//!
//! ```rust,ignore
//! use toolbridge::{BridgeConfig, ServerConfig, ToolBridge};
//!
//! let config = BridgeConfig::new()
//!     .with_server(ServerConfig::stdio("fs", "fs-server").with_allowed_path_prefixes(["/workspace"]));
//! let bridge = ToolBridge::from_config(config).await?;
//!
//! for tool in bridge.list_tools().tools {
//!     println!("{} ({})", tool.name, tool.server_id);
//! }
//! let result = bridge.call_tool("read_file", serde_json::json!({"path": "notes.txt"}), Some(5_000)).await;
//! ```

pub mod aggregator;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod security;
pub mod telemetry;
pub mod transport;
pub mod types;

// Re-export commonly used types at crate root
pub use aggregator::{CapabilityAggregator, ToolListing, ToolSnapshot};
pub use bridge::ToolBridge;
pub use config::{BridgeConfig, BridgeSettings, LaunchSpec, ServerConfig, TransportKind};
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use error::{BridgeError, BridgeResult, ConfigError, ErrorKind};
pub use registry::{ServerHealth, ServerRegistry};
pub use security::{SecurityValidator, ServerPolicy, Verdict};
pub use types::{ToolCallResult, ToolDefinition};

/// Toolbridge version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let config = BridgeConfig::new().with_server(ServerConfig::stdio("fs", "fs-server"));
        assert_eq!(config.servers[0].transport_kind, TransportKind::Stdio);
        assert_eq!(ErrorKind::NotFound.to_string(), "NotFound");
    }
}
