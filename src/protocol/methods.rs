// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Method names and payload shapes for the tool-server handshake and calls.

use serde_json::{json, Value};

use super::error::ProtocolError;
use crate::types::{ServerInfo, ToolDefinition};

pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "notifications/initialized";
pub const TOOLS_LIST: &str = "tools/list";
pub const TOOLS_CALL: &str = "tools/call";
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
pub const PING: &str = "ping";

/// Protocol revision requested during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name announced to tool-servers.
pub const CLIENT_NAME: &str = "toolbridge";

/// Params for `initialize`.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": crate::VERSION,
        }
    })
}

/// Params for one `tools/list` page.
pub fn tools_list_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|c| json!({ "cursor": c }))
}

/// Params for `tools/call`.
pub fn tools_call_params(name: &str, arguments: &Value) -> Value {
    json!({
        "name": name,
        "arguments": arguments,
    })
}

/// Parse an `initialize` result.
pub fn parse_initialize_result(result: &Value) -> Result<ServerInfo, ProtocolError> {
    if !result.is_object() {
        return Err(ProtocolError::unexpected(INITIALIZE, "result is not an object"));
    }

    let server_info = result.get("serverInfo");
    let field = |key: &str| {
        server_info
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Ok(ServerInfo {
        name: field("name").unwrap_or_else(|| "unknown".to_string()),
        version: field("version").unwrap_or_else(|| "0.0.0".to_string()),
        protocol_version: result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .map(str::to_string),
        capabilities: result
            .get("capabilities")
            .cloned()
            .unwrap_or_else(|| json!({})),
        instructions: result
            .get("instructions")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// One page of a `tools/list` result.
#[derive(Debug, Clone, Default)]
pub struct ToolsPage {
    pub tools: Vec<ToolDefinition>,
    /// Entries without a usable name.
    pub skipped: usize,
    pub next_cursor: Option<String>,
}

/// Parse one `tools/list` page for the given server.
pub fn parse_tools_page(server_id: &str, result: &Value) -> Result<ToolsPage, ProtocolError> {
    let entries = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| ProtocolError::unexpected(TOOLS_LIST, "missing 'tools' array"))?;

    let mut page = ToolsPage::default();
    for entry in entries {
        match ToolDefinition::from_wire(server_id, entry) {
            Some(tool) => page.tools.push(tool),
            None => page.skipped += 1,
        }
    }
    page.next_cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_params_announce_client() {
        let params = initialize_params();
        assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(params["clientInfo"]["name"], CLIENT_NAME);
    }

    #[test]
    fn test_parse_initialize_result() {
        let info = parse_initialize_result(&json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "echo-tool", "version": "0.1.0"}
        }))
        .unwrap();
        assert_eq!(info.name, "echo-tool");
        assert_eq!(info.protocol_version.as_deref(), Some("2024-11-05"));

        let info = parse_initialize_result(&json!({})).unwrap();
        assert_eq!(info.name, "unknown");

        assert!(parse_initialize_result(&json!("nope")).is_err());
    }

    #[test]
    fn test_parse_tools_page() {
        let page = parse_tools_page(
            "srv",
            &json!({
                "tools": [{"name": "a"}, {"description": "nameless"}, {"name": "b"}],
                "nextCursor": "page-2"
            }),
        )
        .unwrap();
        assert_eq!(page.tools.len(), 2);
        assert_eq!(page.skipped, 1);
        assert_eq!(page.next_cursor.as_deref(), Some("page-2"));
        assert!(page.tools.iter().all(|t| t.server_id == "srv"));
    }

    #[test]
    fn test_parse_tools_page_requires_array() {
        assert!(matches!(
            parse_tools_page("srv", &json!({"tools": "x"})),
            Err(ProtocolError::UnexpectedResult { .. })
        ));
        let page = parse_tools_page("srv", &json!({"tools": [], "nextCursor": ""})).unwrap();
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_list_params_only_with_cursor() {
        assert!(tools_list_params(None).is_none());
        assert_eq!(tools_list_params(Some("c")).unwrap()["cursor"], "c");
    }
}
