// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the server records and bridge-wide settings, supporting JSON and
//! YAML formats with camelCase keys.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::error::ConfigError;

/// Full bridge configuration.
///
/// Deserializes from either `{"servers": [...], "settings": {...}}` or a bare
/// array of server records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Known tool-servers.
    pub servers: Vec<ServerConfig>,

    /// Bridge-wide settings.
    pub settings: BridgeSettings,
}

impl<'de> Deserialize<'de> for BridgeConfig {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Full {
            #[serde(default)]
            servers: Vec<ServerConfig>,
            #[serde(default)]
            settings: BridgeSettings,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Bare(Vec<ServerConfig>),
            Full(Full),
        }

        Ok(match Shape::deserialize(deserializer)? {
            Shape::Bare(servers) => Self {
                servers,
                settings: BridgeSettings::default(),
            },
            Shape::Full(full) => Self {
                servers: full.servers,
                settings: full.settings,
            },
        })
    }
}

impl BridgeConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server configuration.
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.servers.push(server);
        self
    }

    /// Replace the settings.
    pub fn with_settings(mut self, settings: BridgeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Get a server by id.
    pub fn server(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Validate every server record and the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::invalid(
                    "servers",
                    format!("duplicate server id '{}'", server.id),
                ));
            }
        }
        self.settings.validate()
    }
}

/// Transport kind for a tool-server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawned child process over stdin/stdout.
    Stdio,

    /// One POST per frame.
    Http,

    /// Persistent duplex socket.
    #[serde(alias = "ws")]
    WebSocket,

    /// Server-Sent Events stream plus paired POSTs.
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
            Self::WebSocket => write!(f, "websocket"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

/// Frame delimiting on a stdio pipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StdioFraming {
    /// One JSON object per line.
    #[default]
    Newline,

    /// `Content-Length: N\r\n\r\n` header before each body.
    ContentLength,
}

/// How to reach a tool-server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LaunchSpec {
    /// Spawn a local process.
    Process {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },

    /// Connect to a URL.
    Remote {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

/// Configuration for a single tool-server.
///
/// Immutable once a connection uses it; the registry hands connections an
/// `Arc<ServerConfig>` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Unique id.
    pub id: String,

    /// Human name; defaults to the id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Transport kind.
    pub transport_kind: TransportKind,

    /// Launch spec matching the transport kind.
    pub launch: LaunchSpec,

    /// Environment variables for the spawned process (supports `${VAR}`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Whether the registry connects this server.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Tool names this server may expose and be called with (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,

    /// Glob patterns for permitted command verbs (empty = any).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_commands: Vec<String>,

    /// Glob patterns for forbidden commands; always wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_commands: Vec<String>,

    /// Absolute prefixes every path-shaped argument must resolve under.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_path_prefixes: Vec<String>,

    /// Stdio framing.
    #[serde(default, skip_serializing_if = "is_default_framing")]
    pub framing: StdioFraming,
}

fn default_enabled() -> bool {
    true
}

fn is_default_framing(framing: &StdioFraming) -> bool {
    *framing == StdioFraming::Newline
}

impl ServerConfig {
    fn with_launch(id: impl Into<String>, transport_kind: TransportKind, launch: LaunchSpec) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            transport_kind,
            launch,
            env: BTreeMap::new(),
            enabled: true,
            allowed_tools: Vec::new(),
            allowed_commands: Vec::new(),
            denied_commands: Vec::new(),
            allowed_path_prefixes: Vec::new(),
            framing: StdioFraming::Newline,
        }
    }

    fn remote(id: impl Into<String>, kind: TransportKind, url: impl Into<String>) -> Self {
        Self::with_launch(
            id,
            kind,
            LaunchSpec::Remote {
                url: url.into(),
                headers: BTreeMap::new(),
            },
        )
    }

    /// Create a stdio transport configuration.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_launch(
            id,
            TransportKind::Stdio,
            LaunchSpec::Process {
                command: command.into(),
                args: Vec::new(),
                cwd: None,
            },
        )
    }

    /// Create an HTTP transport configuration.
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::remote(id, TransportKind::Http, url)
    }

    /// Create a WebSocket transport configuration.
    pub fn websocket(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::remote(id, TransportKind::WebSocket, url)
    }

    /// Create an SSE transport configuration.
    pub fn sse(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::remote(id, TransportKind::Sse, url)
    }

    /// Set the human name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add command arguments.
    pub fn with_args(mut self, new_args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let LaunchSpec::Process { args, .. } = &mut self.launch {
            *args = new_args.into_iter().map(|s| s.into()).collect();
        }
        self
    }

    /// Set working directory.
    pub fn with_cwd(mut self, dir: impl Into<String>) -> Self {
        if let LaunchSpec::Process { cwd, .. } = &mut self.launch {
            *cwd = Some(dir.into());
        }
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let LaunchSpec::Remote { headers, .. } = &mut self.launch {
            headers.insert(key.into(), value.into());
        }
        self
    }

    /// Set environment variables.
    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Set the tool allow-list.
    pub fn with_allowed_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set the command allow-list.
    pub fn with_allowed_commands(
        mut self,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed_commands = patterns.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set the command deny-list.
    pub fn with_denied_commands(
        mut self,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.denied_commands = patterns.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set the permitted path prefixes.
    pub fn with_allowed_path_prefixes(
        mut self,
        prefixes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed_path_prefixes = prefixes.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set stdio framing.
    pub fn with_framing(mut self, framing: StdioFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Mark the server disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Name for display; falls back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// The URL for remote transports.
    pub fn url(&self) -> Option<&str> {
        match &self.launch {
            LaunchSpec::Remote { url, .. } => Some(url),
            LaunchSpec::Process { .. } => None,
        }
    }

    /// Check if a tool is on the allow-list.
    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool_name)
    }

    /// Environment with `${VAR}` references expanded.
    pub fn expanded_env(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect()
    }

    /// Headers with `${VAR}` references expanded.
    pub fn expanded_headers(&self) -> BTreeMap<String, String> {
        match &self.launch {
            LaunchSpec::Remote { headers, .. } => headers
                .iter()
                .map(|(k, v)| (k.clone(), expand_env_vars(v)))
                .collect(),
            LaunchSpec::Process { .. } => BTreeMap::new(),
        }
    }

    /// Validate this record in isolation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::MissingField("id".to_string()));
        }
        if self.id.contains('.') {
            return Err(ConfigError::invalid(
                "id",
                format!("'{}' must not contain '.' (reserved for qualified tool names)", self.id),
            ));
        }

        match (&self.launch, self.transport_kind) {
            (LaunchSpec::Process { command, .. }, TransportKind::Stdio) => {
                if command.trim().is_empty() {
                    return Err(ConfigError::MissingField(format!("{}.launch.command", self.id)));
                }
            }
            (LaunchSpec::Remote { url, .. }, kind @ TransportKind::Stdio) => {
                return Err(ConfigError::invalid(
                    format!("{}.launch", self.id),
                    format!("{} transport needs a command, got url '{}'", kind, url),
                ));
            }
            (LaunchSpec::Process { .. }, kind) => {
                return Err(ConfigError::invalid(
                    format!("{}.launch", self.id),
                    format!("{} transport needs a url", kind),
                ));
            }
            (LaunchSpec::Remote { url, .. }, kind) => {
                let parsed = reqwest::Url::parse(url).map_err(|e| {
                    ConfigError::invalid(format!("{}.launch.url", self.id), e.to_string())
                })?;
                let allowed: &[&str] = match kind {
                    TransportKind::WebSocket => &["ws", "wss"],
                    _ => &["http", "https"],
                };
                if !allowed.contains(&parsed.scheme()) {
                    return Err(ConfigError::invalid(
                        format!("{}.launch.url", self.id),
                        format!("scheme '{}' not valid for {} transport", parsed.scheme(), kind),
                    ));
                }
            }
        }

        for prefix in &self.allowed_path_prefixes {
            if !prefix.starts_with('/') {
                return Err(ConfigError::invalid(
                    format!("{}.allowedPathPrefixes", self.id),
                    format!("'{}' is not absolute", prefix),
                ));
            }
        }

        for pattern in self.allowed_commands.iter().chain(&self.denied_commands) {
            globset::Glob::new(pattern).map_err(|e| {
                ConfigError::invalid(format!("{}.commands", self.id), e.to_string())
            })?;
        }

        Ok(())
    }
}

/// Reconnect backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Ceiling for any single delay.
    pub max_delay_ms: u64,
    /// Failed attempts tolerated before the connection closes for good.
    pub max_retries: u32,
    /// Apply +/-25% jitter to each delay.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_retries: 5,
            jitter: true,
        }
    }
}

/// Bridge-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Deadline for calls that pass no timeout.
    pub default_call_timeout_ms: u64,
    /// Deadline for transport open plus handshake.
    pub startup_timeout_ms: u64,
    /// WebSocket ping interval.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a WebSocket is considered dead.
    pub heartbeat_timeout_ms: u64,
    /// Cap on tools accepted from one server.
    pub max_tools_per_server: usize,
    /// SSE stream reconnects before reporting a transport failure.
    pub sse_stream_retries: u32,
    /// Connection reconnect policy.
    pub reconnect: ReconnectPolicy,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            default_call_timeout_ms: 30_000,
            startup_timeout_ms: 30_000,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 45_000,
            max_tools_per_server: 256,
            sse_stream_retries: 3,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl BridgeSettings {
    pub fn default_call_timeout(&self) -> Duration {
        Duration::from_millis(self.default_call_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Reject zero timeouts and an inverted backoff range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("settings.defaultCallTimeoutMs", self.default_call_timeout_ms),
            ("settings.startupTimeoutMs", self.startup_timeout_ms),
            ("settings.heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("settings.heartbeatTimeoutMs", self.heartbeat_timeout_ms),
            ("settings.reconnect.baseDelayMs", self.reconnect.base_delay_ms),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::invalid(
                "settings.reconnect.maxDelayMs",
                "must not be below baseDelayMs",
            ));
        }
        if self.max_tools_per_server == 0 {
            return Err(ConfigError::invalid(
                "settings.maxToolsPerServer",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Expand `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string; an unterminated `${` is kept
/// literally.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + end];
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    result
}
