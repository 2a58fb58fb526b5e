// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use toolbridge::config::{BridgeConfig, BridgeSettings, ReconnectPolicy, ServerConfig};
use toolbridge::{ConnectionEvent, ConnectionState, ToolBridge};

/// Path of the echo tool-server built alongside the tests.
pub const ECHO_TOOL: &str = env!("CARGO_BIN_EXE_echo-tool");

/// Generous upper bound for anything that should happen "soon".
pub const PATIENCE: Duration = Duration::from_secs(10);

/// Settings with short reconnect delays.
pub fn fast_settings() -> BridgeSettings {
    BridgeSettings {
        startup_timeout_ms: 5_000,
        default_call_timeout_ms: 5_000,
        reconnect: ReconnectPolicy {
            base_delay_ms: 50,
            max_delay_ms: 200,
            max_retries: 3,
            jitter: false,
        },
        ..BridgeSettings::default()
    }
}

/// A stdio config running `echo-tool` with the given tools and extra flags.
pub fn echo_server(id: &str, tools: &[&str], extra: &[&str]) -> ServerConfig {
    let mut args: Vec<String> = Vec::new();
    for tool in tools {
        args.push("--tool".to_string());
        args.push(tool.to_string());
    }
    args.extend(extra.iter().map(|s| s.to_string()));
    ServerConfig::stdio(id, ECHO_TOOL).with_args(args)
}

/// Start a bridge and wait until every server is Ready.
pub async fn ready_bridge(settings: BridgeSettings, servers: Vec<ServerConfig>) -> ToolBridge {
    let mut config = BridgeConfig::new().with_settings(settings);
    for server in servers {
        config = config.with_server(server);
    }
    let bridge = ToolBridge::from_config(config).await.unwrap();
    for (id, state) in bridge.wait_until_ready(PATIENCE).await {
        assert_eq!(state, ConnectionState::Ready, "server '{}' did not become ready", id);
    }
    bridge
}

/// Collect the state transitions of `server` until `done` returns true.
pub async fn collect_states(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    server: &str,
    done: impl Fn(&[ConnectionState]) -> bool,
) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + PATIENCE;
    while !done(&seen) {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(ConnectionEvent::StateChanged { server_id, to, .. })) if server_id == server => {
                seen.push(to)
            }
            Ok(Ok(_)) => {}
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
        }
    }
    seen
}

/// Answer one JSON-RPC frame the way a minimal tool-server would. Returns
/// `None` for notifications.
pub fn rpc_reply(frame: &Value, tools: &[&str]) -> Option<Value> {
    let id = frame.get("id")?.clone();
    let method = frame.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = frame.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "in-test", "version": "1.0.0"},
        }),
        "tools/list" => json!({
            "tools": tools
                .iter()
                .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
                .collect::<Vec<_>>(),
        }),
        "tools/call" => json!({
            "content": [{"type": "text", "text": "ok"}],
            "tool": params.get("name").cloned().unwrap_or(Value::Null),
            "arguments": params.get("arguments").cloned().unwrap_or(Value::Null),
        }),
        "ping" => json!({}),
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {}", other)},
            }))
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

/// One parsed HTTP/1.1 request.
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// Read a request head and its `Content-Length` body.
pub async fn read_http_request(stream: &mut BufReader<TcpStream>) -> Option<HttpRequest> {
    let mut line = String::new();
    if stream.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut length = 0usize;
    loop {
        let mut header = String::new();
        stream.read_line(&mut header).await.ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                length = value.trim().parse().ok()?;
            }
        }
    }

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.ok()?;
    Some(HttpRequest { method, path, body })
}

/// Write a complete response and close the connection.
pub async fn write_http_response(
    stream: &mut BufReader<TcpStream>,
    status: &str,
    content_type: &str,
    body: &[u8],
) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    let stream = stream.get_mut();
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(body).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}
