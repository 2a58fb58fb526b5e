// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files, selected by
//! extension.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::BridgeConfig;

/// Config directory name under the user config dir.
pub const CONFIG_DIR: &str = "toolbridge";

/// Default config file name.
pub const CONFIG_FILE: &str = "servers.json";

/// Environment variable that overrides the default config path.
pub const CONFIG_ENV: &str = "TOOLBRIDGE_CONFIG";

/// Get the default config directory path.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR))
}

/// Get the default config file path.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    default_config_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Load and validate a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content, is_yaml(path))?;
    config.validate()?;
    Ok(config)
}

/// Load the default config file, or an empty config when none exists.
pub fn load_default_config() -> Result<BridgeConfig, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_config_file(&path),
        _ => Ok(BridgeConfig::default()),
    }
}

/// Parse configuration text without validating it.
pub fn parse_config(content: &str, yaml: bool) -> Result<BridgeConfig, ConfigError> {
    if yaml {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    } else {
        serde_json::from_str(content).map_err(ConfigError::from)
    }
}

/// Save configuration to a file, creating parent directories.
///
/// YAML paths are written as YAML; everything else as pretty JSON.
pub fn save_config_file(path: &Path, config: &BridgeConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let content = if is_yaml(path) {
        serde_yaml::to_string(config)?
    } else {
        serde_json::to_string_pretty(config)?
    };

    // Write-then-rename so a crash never leaves a truncated file behind.
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref(),
        Some("yaml") | Some("yml")
    )
}
