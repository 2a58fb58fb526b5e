// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistence for the registry's server list.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::loader::{load_config_file, save_config_file};
use super::types::{BridgeConfig, BridgeSettings, ServerConfig};

/// Where the registry writes its server list after every mutation.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Persist the current server list.
    async fn save(&self, servers: &[ServerConfig]) -> Result<(), ConfigError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Rewrites a config file in place, preserving its settings block.
pub struct FileConfigStore {
    path: PathBuf,
    settings: BridgeSettings,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>, settings: BridgeSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    /// Open an existing file, keeping whatever settings it carries.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = if path.exists() {
            load_config_file(&path)?.settings
        } else {
            BridgeSettings::default()
        };
        Ok(Self { path, settings })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn save(&self, servers: &[ServerConfig]) -> Result<(), ConfigError> {
        let config = BridgeConfig {
            servers: servers.to_vec(),
            settings: self.settings.clone(),
        };
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || save_config_file(&path, &config))
            .await
            .map_err(|e| ConfigError::IoError(e.to_string()))?
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Keeps the last saved list in memory.
#[derive(Default)]
pub struct MemoryConfigStore {
    saved: Mutex<Option<Vec<ServerConfig>>>,
    saves: Mutex<usize>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently saved list.
    pub fn snapshot(&self) -> Option<Vec<ServerConfig>> {
        self.saved.lock().clone()
    }

    /// How many times `save` ran.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn save(&self, servers: &[ServerConfig]) -> Result<(), ConfigError> {
        *self.saved.lock() = Some(servers.to_vec());
        *self.saves.lock() += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_preserves_settings() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("servers.json");
        std::fs::write(&path, r#"{"servers": [], "settings": {"maxToolsPerServer": 8}}"#).unwrap();

        let store = FileConfigStore::open(&path).unwrap();
        store
            .save(&[ServerConfig::stdio("echo", "echo-tool")])
            .await
            .unwrap();

        let reloaded = load_config_file(&path).unwrap();
        assert_eq!(reloaded.servers.len(), 1);
        assert_eq!(reloaded.settings.max_tools_per_server, 8);
        assert!(store.describe().ends_with("servers.json"));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryConfigStore::new();
        assert!(store.snapshot().is_none());
        store.save(&[]).await.unwrap();
        store.save(&[ServerConfig::stdio("a", "x")]).await.unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }
}
