// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The agent-facing facade.
//!
//! [`ToolBridge`] wires the registry, aggregator, validator, dispatcher, and
//! metrics together. Everything is constructed explicitly here and shared by
//! `Arc`; there is no process-wide instance.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use crate::aggregator::{CapabilityAggregator, Resolved, ToolListWatcher, ToolSnapshot};
use crate::config::{load_config_file, BridgeConfig, BridgeSettings, ConfigStore, FileConfigStore};
use crate::connection::{ConnectionContext, ConnectionEvent, ConnectionState};
use crate::dispatcher::{CallDispatcher, Dispatched};
use crate::error::BridgeResult;
use crate::registry::{ServerHealth, ServerRegistry};
use crate::telemetry::{Metrics, MetricsSnapshot};
use crate::types::ToolCallResult;

pub struct ToolBridge {
    registry: Arc<ServerRegistry>,
    aggregator: Arc<CapabilityAggregator>,
    dispatcher: CallDispatcher,
}

impl ToolBridge {
    /// An empty bridge.
    pub fn new(settings: BridgeSettings) -> Self {
        Self::assemble(ServerRegistry::new(ConnectionContext::new(settings)))
    }

    /// Build from a parsed configuration; enabled servers start connecting
    /// immediately.
    pub async fn from_config(config: BridgeConfig) -> BridgeResult<Self> {
        Self::build(config, None).await
    }

    /// Load `path` and persist later registry changes back to it.
    pub async fn from_config_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let config = load_config_file(path)?;
        let store: Arc<dyn ConfigStore> =
            Arc::new(FileConfigStore::new(path, config.settings.clone()));
        Self::build(config, Some(store)).await
    }

    /// Build from `config`, persisting later registry changes to `store`.
    pub async fn with_store(
        config: BridgeConfig,
        store: Arc<dyn ConfigStore>,
    ) -> BridgeResult<Self> {
        Self::build(config, Some(store)).await
    }

    async fn build(config: BridgeConfig, store: Option<Arc<dyn ConfigStore>>) -> BridgeResult<Self> {
        config.validate()?;
        let registry = ServerRegistry::new(ConnectionContext::new(config.settings));
        for server in config.servers {
            registry.register(server).await?;
        }
        // Attached after the initial load so startup does not rewrite the file.
        let registry = match store {
            Some(store) => registry.with_store(store),
            None => registry,
        };
        let bridge = Self::assemble(registry);
        info!(servers = bridge.registry.list().len(), "Tool bridge started");
        Ok(bridge)
    }

    fn assemble(registry: ServerRegistry) -> Self {
        let registry = Arc::new(registry);
        let aggregator = Arc::new(CapabilityAggregator::new(Arc::clone(&registry)));
        let dispatcher = CallDispatcher::new(Arc::clone(&registry), Arc::clone(&aggregator));
        Self {
            registry,
            aggregator,
            dispatcher,
        }
    }

    /// Tools of every Ready server.
    pub fn list_tools(&self) -> ToolSnapshot {
        self.aggregator.list_tools()
    }

    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        self.aggregator.resolve(name)
    }

    /// Call a tool. `timeout_ms` defaults to the configured call timeout.
    pub async fn call_tool(&self, name: &str, args: Value, timeout_ms: Option<u64>) -> ToolCallResult {
        self.dispatcher
            .call_tool(name, args, timeout_ms.map(Duration::from_millis))
            .await
    }

    /// Like [`call_tool`](Self::call_tool) but keeps the typed error.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Value,
        timeout_ms: Option<u64>,
    ) -> BridgeResult<Dispatched> {
        self.dispatcher
            .dispatch(name, args, timeout_ms.map(Duration::from_millis))
            .await
    }

    /// Every connection event: state changes, tool list changes, server
    /// notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.registry.subscribe()
    }

    /// Fires when the merged tool list may have changed.
    pub fn tool_changes(&self) -> ToolListWatcher {
        self.aggregator.watch()
    }

    pub fn health(&self) -> Vec<ServerHealth> {
        self.registry.health()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.registry.context().metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics().snapshot()
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    /// Wait until every enabled server is Ready or has given up.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Vec<(String, ConnectionState)> {
        let ids: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| s.id)
            .collect();
        let waits = ids.iter().map(|id| {
            let registry = Arc::clone(&self.registry);
            async move {
                let state = registry
                    .wait_for_state(id, ConnectionState::Ready, timeout)
                    .await
                    .unwrap_or(ConnectionState::Closed);
                (id.clone(), state)
            }
        });
        join_all(waits).await
    }

    /// Close every connection, failing anything still in flight.
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
        info!("Tool bridge stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfigStore, ServerConfig};
    use crate::error::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_bridge() {
        let bridge = ToolBridge::new(BridgeSettings::default());
        assert!(bridge.list_tools().tools.is_empty());
        assert!(bridge.health().is_empty());

        let result = bridge.call_tool("echo", json!({}), Some(10)).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(bridge.metrics().counters().not_found, 1);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected_at_load() {
        let config = BridgeConfig::new()
            .with_server(ServerConfig::stdio("fs", "a").disabled())
            .with_server(ServerConfig::stdio("fs", "b").disabled());
        let err = ToolBridge::from_config(config).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_initial_load_is_not_persisted() {
        let store = Arc::new(MemoryConfigStore::new());
        let config = BridgeConfig::new().with_server(ServerConfig::stdio("fs", "a").disabled());
        let bridge = ToolBridge::with_store(config, store.clone()).await.unwrap();
        assert_eq!(store.save_count(), 0);

        bridge
            .registry()
            .register(ServerConfig::stdio("git", "b").disabled())
            .await
            .unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.snapshot().unwrap().len(), 2);

        let states = bridge.wait_until_ready(Duration::from_millis(10)).await;
        assert!(states.is_empty());
        bridge.shutdown().await;
    }
}
