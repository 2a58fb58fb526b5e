// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Minimal stdio tool-server used by the integration tests.
//!
//! Advertises the tools named with `--tool` and answers every call by
//! echoing its arguments. Special tool names:
//!
//! - `exit`: terminate the process without replying (after `afterMs`)
//! - `add_tool`: advertise one more tool (`name`) and announce the change
//!
//! Calls are answered concurrently, so replies may arrive out of order.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use toolbridge::config::StdioFraming;
use toolbridge::protocol::{self, methods, Incoming, Request, RpcError};
use toolbridge::transport::framing::{encode_frame, read_frame};

#[derive(Parser)]
#[command(name = "echo-tool", about = "Echo tool-server for tests")]
struct Args {
    /// Tool to advertise (repeatable)
    #[arg(long = "tool", default_values_t = vec!["echo".to_string()])]
    tools: Vec<String>,

    /// Delay before answering each tools/call
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Tools per tools/list page (0 = one page)
    #[arg(long, default_value_t = 0)]
    page_size: usize,

    /// Frame delimiting on stdin/stdout
    #[arg(long, value_enum, default_value = "newline")]
    framing: Framing,
}

#[derive(Clone, Copy, ValueEnum)]
enum Framing {
    Newline,
    ContentLength,
}

impl From<Framing> for StdioFraming {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::Newline => StdioFraming::Newline,
            Framing::ContentLength => StdioFraming::ContentLength,
        }
    }
}

struct Server {
    tools: Mutex<Vec<String>>,
    delay: Duration,
    page_size: usize,
    out: mpsc::Sender<Vec<u8>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let framing: StdioFraming = args.framing.into();

    let (out, mut outbox) = mpsc::channel::<Vec<u8>>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(body) = outbox.recv().await {
            if stdout.write_all(&encode_frame(framing, &body)).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let server = Arc::new(Server {
        tools: Mutex::new(args.tools),
        delay: Duration::from_millis(args.delay_ms),
        page_size: args.page_size,
        out,
    });
    eprintln!("echo-tool ready");

    let mut stdin = BufReader::new(tokio::io::stdin());
    while let Some(frame) = read_frame(&mut stdin, framing).await? {
        match protocol::decode(&frame) {
            Ok(Incoming::Request(request)) => {
                let server = Arc::clone(&server);
                tokio::spawn(async move { server.handle(request).await });
            }
            Ok(_) => {}
            Err(e) => eprintln!("echo-tool: dropping frame: {}", e),
        }
    }

    drop(server);
    let _ = writer.await;
    Ok(())
}

impl Server {
    async fn handle(&self, request: Request) {
        let outcome = match request.method.as_str() {
            methods::INITIALIZE => Ok(json!({
                "protocolVersion": methods::PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {"name": "echo-tool", "version": env!("CARGO_PKG_VERSION")},
            })),
            methods::TOOLS_LIST => Ok(self.list_page(request.params.as_ref())),
            methods::PING => Ok(json!({})),
            methods::TOOLS_CALL => self.call(request.params.unwrap_or(Value::Null)).await,
            other => Err(RpcError::method_not_found(other)),
        };
        if let Ok(body) = protocol::encode_response(&request.id, &outcome) {
            let _ = self.out.send(body).await;
        }
    }

    fn list_page(&self, params: Option<&Value>) -> Value {
        let tools = self.tools.lock().clone();
        let start = params
            .and_then(|p| p.get("cursor"))
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0)
            .min(tools.len());
        let end = if self.page_size == 0 {
            tools.len()
        } else {
            (start + self.page_size).min(tools.len())
        };

        let page: Vec<Value> = tools[start..end]
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "description": format!("Echoes its arguments ({})", name),
                    "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}},
                })
            })
            .collect();

        let mut result = json!({ "tools": page });
        if end < tools.len() {
            result["nextCursor"] = json!(end.to_string());
        }
        result
    }

    async fn call(&self, params: Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        if !self.tools.lock().contains(&name) {
            return Err(RpcError::new(
                RpcError::INVALID_PARAMS,
                format!("unknown tool: {}", name),
            ));
        }

        let delay = arguments
            .get("delayMs")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(self.delay);
        tokio::time::sleep(delay).await;

        match name.as_str() {
            "exit" => {
                let after = arguments.get("afterMs").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(after)).await;
                std::process::exit(3);
            }
            "add_tool" => {
                let added = arguments
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("extra")
                    .to_string();
                self.tools.lock().push(added.clone());
                if let Ok(body) = protocol::encode_notification(methods::TOOLS_LIST_CHANGED, None) {
                    let _ = self.out.send(body).await;
                }
                Ok(json!({
                    "content": [{"type": "text", "text": format!("added {}", added)}],
                }))
            }
            _ => Ok(json!({
                "content": [{"type": "text", "text": arguments.to_string()}],
                "tool": name,
                "arguments": arguments,
            })),
        }
    }
}
