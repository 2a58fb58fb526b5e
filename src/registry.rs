// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server registry.
//!
//! The registry is the single owner of the id → connection map. It keeps
//! every known [`ServerConfig`] whether or not the server is enabled, creates
//! a [`Connection`] on enable, and tears it down on disable, unregister, or
//! shutdown. Each connection's events are relayed into one hub that the
//! aggregator, the agent, and health views subscribe to.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{ConfigStore, ServerConfig};
use crate::connection::{Connection, ConnectionContext, ConnectionEvent, ConnectionState};
use crate::error::{BridgeError, BridgeResult};
use crate::security::ServerPolicy;

/// Capacity of the registry-level event hub.
pub const HUB_CAPACITY: usize = 256;

struct Entry {
    config: Arc<ServerConfig>,
    policy: Arc<ServerPolicy>,
    connection: Option<Arc<Connection>>,
}

/// Health of one server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    pub server_id: String,
    pub name: String,
    pub state: ConnectionState,
    pub enabled: bool,
    pub last_error: Option<String>,
    pub reconnect_attempts: u64,
    pub tool_count: usize,
    pub frames_sent: u64,
    pub last_ready_at: Option<DateTime<Utc>>,
}

/// Holds every configured server and owns their connections.
pub struct ServerRegistry {
    ctx: ConnectionContext,
    entries: RwLock<BTreeMap<String, Entry>>,
    hub: broadcast::Sender<ConnectionEvent>,
    store: Option<Arc<dyn ConfigStore>>,
}

impl ServerRegistry {
    pub fn new(ctx: ConnectionContext) -> Self {
        let (hub, _) = broadcast::channel(HUB_CAPACITY);
        Self {
            ctx,
            entries: RwLock::new(BTreeMap::new()),
            hub,
            store: None,
        }
    }

    /// Rewrite the server list to `store` after every mutation.
    pub fn with_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Add a server. Connects immediately when the config is enabled.
    ///
    /// A duplicate id fails with `RegistryConflict` and changes nothing.
    pub async fn register(&self, config: ServerConfig) -> BridgeResult<()> {
        config.validate()?;
        let policy = Arc::new(ServerPolicy::compile(&config)?);
        let id = config.id.clone();

        {
            let mut entries = self.entries.write();
            if entries.contains_key(&id) {
                return Err(BridgeError::RegistryConflict(id));
            }
            let config = Arc::new(config);
            let connection = config.enabled.then(|| self.spawn_connection(&config));
            entries.insert(
                id.clone(),
                Entry {
                    config,
                    policy,
                    connection,
                },
            );
        }

        info!(server = %id, "Server registered");
        self.persist().await;
        Ok(())
    }

    /// Remove a server and close its connection.
    pub async fn unregister(&self, id: &str) -> BridgeResult<()> {
        let entry = self
            .entries
            .write()
            .remove(id)
            .ok_or_else(|| BridgeError::ServerNotFound(id.to_string()))?;
        if let Some(connection) = entry.connection {
            connection.shutdown().await;
        }
        info!(server = %id, "Server unregistered");
        self.persist().await;
        Ok(())
    }

    /// Create the server's connection. Replaces a Closed one; no-op while a
    /// live connection exists.
    pub async fn enable(&self, id: &str) -> BridgeResult<()> {
        let replaced = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| BridgeError::ServerNotFound(id.to_string()))?;
            if let Some(existing) = &entry.connection {
                if !existing.state().is_terminal() {
                    return Ok(());
                }
            }
            if !entry.config.enabled {
                let mut config = (*entry.config).clone();
                config.enabled = true;
                entry.config = Arc::new(config);
            }
            let connection = self.spawn_connection(&entry.config);
            entry.connection.replace(connection)
        };

        if let Some(old) = replaced {
            old.shutdown().await;
        }
        info!(server = %id, "Server enabled");
        self.persist().await;
        Ok(())
    }

    /// Tear down the connection but keep the config.
    pub async fn disable(&self, id: &str) -> BridgeResult<()> {
        let connection = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| BridgeError::ServerNotFound(id.to_string()))?;
            if entry.config.enabled {
                let mut config = (*entry.config).clone();
                config.enabled = false;
                entry.config = Arc::new(config);
            }
            entry.connection.take()
        };

        if let Some(connection) = connection {
            connection.shutdown().await;
        }
        info!(server = %id, "Server disabled");
        self.persist().await;
        Ok(())
    }

    /// All configs, ordered by id.
    pub fn list(&self) -> Vec<ServerConfig> {
        self.entries
            .read()
            .values()
            .map(|e| (*e.config).clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ServerConfig> {
        self.entries.read().get(id).map(|e| (*e.config).clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// The live connection of a server, if enabled.
    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.entries
            .read()
            .get(id)
            .and_then(|e| e.connection.clone())
    }

    /// Connection and compiled policy for dispatch.
    pub fn route(&self, id: &str) -> Option<(Option<Arc<Connection>>, Arc<ServerPolicy>)> {
        self.entries
            .read()
            .get(id)
            .map(|e| (e.connection.clone(), Arc::clone(&e.policy)))
    }

    /// Connections currently Ready.
    pub fn ready_connections(&self) -> Vec<Arc<Connection>> {
        self.entries
            .read()
            .values()
            .filter_map(|e| e.connection.clone())
            .filter(|c| c.is_ready())
            .collect()
    }

    pub fn health(&self) -> Vec<ServerHealth> {
        self.entries.read().values().map(health_of).collect()
    }

    pub fn server_health(&self, id: &str) -> Option<ServerHealth> {
        self.entries.read().get(id).map(health_of)
    }

    /// Wait until server `id` reaches `target` or `timeout` elapses.
    /// Returns the state observed last.
    pub async fn wait_for_state(
        &self,
        id: &str,
        target: ConnectionState,
        timeout: Duration,
    ) -> BridgeResult<ConnectionState> {
        let connection = self.connection(id);
        match connection {
            Some(connection) => Ok(connection.wait_for_state(target, timeout).await),
            None if self.contains(id) => Ok(ConnectionState::Disconnected),
            None => Err(BridgeError::ServerNotFound(id.to_string())),
        }
    }

    /// Events from every connection, in arrival order per connection.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.hub.subscribe()
    }

    /// Close every connection. Configs are kept.
    pub async fn shutdown_all(&self) {
        let connections: Vec<Arc<Connection>> = self
            .entries
            .write()
            .values_mut()
            .filter_map(|e| e.connection.take())
            .collect();
        let count = connections.len();
        join_all(connections.iter().map(|c| c.shutdown())).await;
        info!(connections = count, "All connections closed");
    }

    /// Build a connection, wire its events into the hub, and start it.
    fn spawn_connection(&self, config: &Arc<ServerConfig>) -> Arc<Connection> {
        let connection = Arc::new(Connection::new((**config).clone(), self.ctx.clone()));
        let mut events = connection.subscribe();
        let hub = self.hub.clone();
        let server = config.id.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let _ = hub.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(server = %server, skipped, "Event relay lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(server = %server, "Event relay finished");
        });
        connection.start();
        connection
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let servers = self.list();
        if let Err(e) = store.save(&servers).await {
            warn!(store = %store.describe(), "Failed to persist server list: {}", e);
        }
    }
}

fn health_of(entry: &Entry) -> ServerHealth {
    let (state, stats, tool_count) = match &entry.connection {
        Some(connection) => (
            connection.state(),
            connection.stats(),
            connection.tools().len(),
        ),
        None => (ConnectionState::Disconnected, Default::default(), 0),
    };
    ServerHealth {
        server_id: entry.config.id.clone(),
        name: entry.config.display_name().to_string(),
        state,
        enabled: entry.config.enabled,
        last_error: stats.last_error,
        reconnect_attempts: stats.reconnect_attempts,
        tool_count,
        frames_sent: stats.frames_sent,
        last_ready_at: stats.last_ready_at,
    }
}
