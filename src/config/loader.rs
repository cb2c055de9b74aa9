// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{
    DelegationConfigPartial, TimingConfigPartial, WorkerConfigPartial, WorkspaceConfig,
};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    ".taskrelay.json",
    ".taskrelay/config.json",
    "taskrelay.config.json",
    ".taskrelay.yaml",
    ".taskrelay/config.yaml",
];

/// Local config file name (for per-directory overrides).
pub const LOCAL_CONFIG_FILE: &str = ".taskrelay.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".taskrelay";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.taskrelay/config.json.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the repository root.
///
/// Searches [`CONFIG_FILES`] in order and loads the first one found.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load local configuration from .taskrelay.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Save workspace configuration, as YAML when `filename` ends in `.yaml`
/// or `.yml` and as JSON otherwise.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let path = workspace_root.join(filename.unwrap_or(CONFIG_FILES[0]));
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => serde_yaml::to_string(config)?,
        _ => serde_json::to_string_pretty(config)?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Write a first workspace config file.
///
/// Refuses to run when any workspace config file already exists, so an
/// existing setup is never clobbered.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    if let Some(existing) = CONFIG_FILES
        .iter()
        .map(|f| workspace_root.join(f))
        .find(|p| p.exists())
    {
        return Err(ConfigError::AlreadyExists(existing.display().to_string()));
    }
    save_workspace_config(workspace_root, &config.unwrap_or_default(), None)
}

/// Find the repository root by searching for config files or a `.git`
/// directory.
///
/// Walks up the directory tree from `start` until it finds a match or
/// reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        // Check if any config file exists in this directory
        for filename in CONFIG_FILES {
            if current.join(filename).exists() {
                return Some(current);
            }
        }
        if current.join(".git").exists() {
            return Some(current);
        }

        // Move up one directory
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Get an example configuration.
pub fn get_example_config() -> WorkspaceConfig {
    WorkspaceConfig {
        worker: Some(WorkerConfigPartial {
            program: Some("claude".to_string()),
            env: Some(HashMap::from([(
                "TASKRELAY_WORKER".to_string(),
                "1".to_string(),
            )])),
            ..Default::default()
        }),
        timing: Some(TimingConfigPartial {
            poll_interval_secs: Some(120),
            response_timeout_secs: Some(14400),
            heartbeat_interval_secs: Some(1800),
            ..Default::default()
        }),
        delegation: Some(DelegationConfigPartial {
            reject_adhoc_when_busy: Some(true),
        }),
        ..Default::default()
    }
}
