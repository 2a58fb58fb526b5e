// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types shared across the bridge.
//!
//! This module defines what tool-servers advertise (tools, server info) and
//! what the agent gets back from a call.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{BridgeError, ErrorKind};

// ============================================================================
// Tool Definitions
// ============================================================================

/// A tool advertised by one tool-server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name, unique within its server.
    pub name: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON-schema-like argument description, passed through untouched.
    #[serde(rename = "schema")]
    pub input_schema: Value,

    /// Owning server id.
    pub server_id: String,

    /// Server hint: the tool does not modify its environment.
    #[serde(default)]
    pub read_only: bool,

    /// Server hint: the tool may perform destructive updates.
    #[serde(default)]
    pub destructive: bool,
}

impl ToolDefinition {
    /// Create a tool with an empty object schema.
    pub fn new(server_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: default_schema(),
            server_id: server_id.into(),
            read_only: false,
            destructive: false,
        }
    }

    /// Build from one entry of a `tools/list` result.
    ///
    /// Returns `None` when the entry has no usable name.
    pub fn from_wire(server_id: &str, entry: &Value) -> Option<Self> {
        let name = entry.get("name")?.as_str()?.trim();
        if name.is_empty() {
            return None;
        }

        let annotations = entry.get("annotations");
        let hint = |key: &str| {
            annotations
                .and_then(|a| a.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };

        Some(Self {
            name: name.to_string(),
            description: entry
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            input_schema: entry
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(default_schema),
            server_id: server_id.to_string(),
            read_only: hint("readOnlyHint"),
            destructive: hint("destructiveHint"),
        })
    }

    /// Get the qualified tool name (`serverId.toolName`).
    pub fn qualified_name(&self) -> String {
        qualify(&self.server_id, &self.name)
    }
}

/// Join a server id and tool name into the disambiguated form.
pub fn qualify(server_id: &str, tool: &str) -> String {
    format!("{}.{}", server_id, tool)
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

// ============================================================================
// Server Info
// ============================================================================

/// Server information reported during the `initialize` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name.
    pub name: String,

    /// Server version.
    pub version: String,

    /// Protocol version the server agreed to.
    #[serde(default)]
    pub protocol_version: Option<String>,

    /// Raw capabilities object.
    #[serde(default)]
    pub capabilities: Value,

    /// Optional usage instructions for the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl ServerInfo {
    /// Whether the server announced it will emit `tools/list_changed`.
    pub fn notifies_tool_changes(&self) -> bool {
        self.capabilities
            .get("tools")
            .and_then(|t| t.get("listChanged"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "0.0.0".to_string(),
            protocol_version: None,
            capabilities: Value::Object(Default::default()),
            instructions: None,
        }
    }
}

// ============================================================================
// Call Results
// ============================================================================

/// Outcome of one `call_tool`, as handed to the agent.
///
/// Serializes to `{"ok": true, "data": ...}` or
/// `{"ok": false, "errorKind": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallResult {
    Success {
        server_id: String,
        tool: String,
        data: Value,
        warnings: Vec<String>,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        retryable: bool,
    },
}

impl ToolCallResult {
    /// Create a successful result.
    pub fn success(server_id: impl Into<String>, tool: impl Into<String>, data: Value) -> Self {
        Self::Success {
            server_id: server_id.into(),
            tool: tool.into(),
            data,
            warnings: Vec::new(),
        }
    }

    /// Attach warnings to a successful result; no-op on failures.
    pub fn with_warnings(mut self, extra: Vec<String>) -> Self {
        if let Self::Success { warnings, .. } = &mut self {
            warnings.extend(extra);
        }
        self
    }

    /// Whether the call succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The success payload, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    /// The failure kind, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl From<&BridgeError> for ToolCallResult {
    fn from(err: &BridgeError) -> Self {
        Self::Failure {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl From<BridgeError> for ToolCallResult {
    fn from(err: BridgeError) -> Self {
        Self::from(&err)
    }
}

impl Serialize for ToolCallResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success {
                server_id,
                tool,
                data,
                warnings,
            } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("data", data)?;
                map.serialize_entry("serverId", server_id)?;
                map.serialize_entry("tool", tool)?;
                if !warnings.is_empty() {
                    map.serialize_entry("warnings", warnings)?;
                }
                map.end()
            }
            Self::Failure {
                kind,
                message,
                retryable,
            } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("errorKind", kind)?;
                map.serialize_entry("message", message)?;
                map.serialize_entry("retryable", retryable)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_from_wire() {
        let entry = json!({
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}},
            "annotations": {"readOnlyHint": true}
        });
        let tool = ToolDefinition::from_wire("fs", &entry).unwrap();
        assert_eq!(tool.name, "read_file");
        assert_eq!(tool.server_id, "fs");
        assert!(tool.read_only);
        assert!(!tool.destructive);
        assert_eq!(tool.qualified_name(), "fs.read_file");
        assert_eq!(tool.input_schema["properties"]["path"]["type"], "string");
    }

    #[test]
    fn test_tool_from_wire_requires_name() {
        assert!(ToolDefinition::from_wire("fs", &json!({"description": "x"})).is_none());
        assert!(ToolDefinition::from_wire("fs", &json!({"name": "  "})).is_none());
        let tool = ToolDefinition::from_wire("fs", &json!({"name": "bare"})).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_tool_listing_shape() {
        let tool = ToolDefinition::new("srv", "echo");
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["name"], "echo");
        assert_eq!(value["serverId"], "srv");
        assert!(value.get("schema").is_some());
    }

    #[test]
    fn test_server_info_list_changed_capability() {
        let info: ServerInfo = serde_json::from_value(json!({
            "name": "echo",
            "version": "1.0",
            "capabilities": {"tools": {"listChanged": true}}
        }))
        .unwrap();
        assert!(info.notifies_tool_changes());
        assert!(!ServerInfo::default().notifies_tool_changes());
    }

    #[test]
    fn test_call_result_serialization() {
        let ok = ToolCallResult::success("srv", "echo", json!({"text": "hi"}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"ok": true, "data": {"text": "hi"}, "serverId": "srv", "tool": "echo"})
        );

        let err = ToolCallResult::from(BridgeError::ToolNotFound("nope".to_string()));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["errorKind"], "NotFound");
        assert_eq!(value["retryable"], false);
        assert!(value["message"].as_str().unwrap().contains("nope"));
    }

    #[test]
    fn test_warnings_only_on_success() {
        let ok = ToolCallResult::success("a", "search", json!(null))
            .with_warnings(vec!["'search' is ambiguous".to_string()]);
        assert_eq!(serde_json::to_value(&ok).unwrap()["warnings"][0], "'search' is ambiguous");

        let err = ToolCallResult::from(BridgeError::policy("x", "denied"))
            .with_warnings(vec!["ignored".to_string()]);
        assert_eq!(err.error_kind(), Some(ErrorKind::PolicyViolation));
        assert!(err.data().is_none());
    }
}
