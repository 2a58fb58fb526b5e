// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for the bridge.
//!
//! Handles loading, validation, and persistence of server records:
//! - Default file: `<config dir>/toolbridge/servers.json` (or `$TOOLBRIDGE_CONFIG`)
//! - JSON or YAML, chosen by extension
//! - `${VAR}` expansion in env values and headers at connect time
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "servers": [
//!     {
//!       "id": "fs",
//!       "transportKind": "stdio",
//!       "launch": {"command": "fs-server", "args": ["--root", "/workspace"]},
//!       "allowedPathPrefixes": ["/workspace"]
//!     },
//!     {
//!       "id": "search",
//!       "transportKind": "websocket",
//!       "launch": {"url": "wss://tools.example.com/ws", "headers": {"Authorization": "Bearer ${SEARCH_TOKEN}"}}
//!     }
//!   ],
//!   "settings": {"defaultCallTimeoutMs": 30000}
//! }
//! ```

mod loader;
mod store;
mod types;

pub use loader::{
    default_config_dir, default_config_path, load_config_file, load_default_config, parse_config,
    save_config_file, CONFIG_DIR, CONFIG_ENV, CONFIG_FILE,
};

pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore};

pub use types::{
    expand_env_vars, BridgeConfig, BridgeSettings, LaunchSpec, ReconnectPolicy, ServerConfig,
    StdioFraming, TransportKind,
};
