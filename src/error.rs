// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the tool bridge.
//!
//! Each layer has its own `thiserror` enum ([`ProtocolError`], [`TransportError`],
//! [`ConfigError`]); [`BridgeError`] is what callers of the bridge see. Every
//! `BridgeError` maps onto one [`ErrorKind`] of the caller-facing taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::ConnectionState;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Connect failed, socket/process died, heartbeat timeout.
    #[serde(rename = "TransportError")]
    Transport,
    /// Malformed frame or unknown correlation id.
    #[serde(rename = "ProtocolError")]
    Protocol,
    /// Denied by the security validator.
    PolicyViolation,
    /// Unknown tool, unknown server, or owner not ready.
    NotFound,
    /// Deadline elapsed with no response.
    Timeout,
    /// Duplicate server id on register.
    RegistryConflict,
    /// The tool-server answered with a JSON-RPC error envelope.
    ServerError,
    /// Invalid configuration.
    #[serde(rename = "ConfigError")]
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "TransportError"),
            Self::Protocol => write!(f, "ProtocolError"),
            Self::PolicyViolation => write!(f, "PolicyViolation"),
            Self::NotFound => write!(f, "NotFound"),
            Self::Timeout => write!(f, "Timeout"),
            Self::RegistryConflict => write!(f, "RegistryConflict"),
            Self::ServerError => write!(f, "ServerError"),
            Self::Config => write!(f, "ConfigError"),
        }
    }
}

/// Errors returned to callers of the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The owning connection's transport failed while the call was in flight.
    #[error("transport failure on '{server}': {source}")]
    Transport {
        server: String,
        #[source]
        source: TransportError,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The security validator denied the call.
    #[error("policy violation for '{tool}': {reason}")]
    PolicyViolation { tool: String, reason: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("server '{server}' is not ready (state: {state})")]
    NotReady {
        server: String,
        state: ConnectionState,
    },

    #[error("'{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("server '{0}' is already registered")]
    RegistryConflict(String),

    #[error("tool-server '{server}' returned error {code}: {message}")]
    ServerError {
        server: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Wrap a transport failure for a given server.
    pub fn transport(server: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            server: server.into(),
            source,
        }
    }

    /// Create a policy violation.
    pub fn policy(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PolicyViolation {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            Self::ToolNotFound(_) | Self::ServerNotFound(_) | Self::NotReady { .. } => {
                ErrorKind::NotFound
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RegistryConflict(_) => ErrorKind::RegistryConflict,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the agent may reasonably retry the call.
    ///
    /// The bridge itself never retries a call that reached a tool-server.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result alias for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
