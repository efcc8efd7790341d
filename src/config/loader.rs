// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Settings file discovery and parsing (JSON or YAML by extension).

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::SettingsFile;

/// Workspace settings files, first match wins.
pub const CONFIG_FILES: &[&str] = &[".relay.json", ".relay.yaml", "relay.config.json"];

/// Personal overrides, normally gitignored.
pub const LOCAL_CONFIG_FILE: &str = ".relay.local.json";

pub const GLOBAL_CONFIG_DIR: &str = ".relay";

/// Global settings files inside [`GLOBAL_CONFIG_DIR`], first match wins.
pub const GLOBAL_CONFIG_FILES: &[&str] = &["config.json", "config.yaml"];

pub fn global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Load `~/.relay/config.{json,yaml}`.
pub fn load_global_settings() -> Result<Option<SettingsFile>, ConfigError> {
    match global_config_dir() {
        Some(dir) => load_first(&dir, GLOBAL_CONFIG_FILES),
        None => Ok(None),
    }
}

pub fn load_workspace_settings(workspace_root: &Path) -> Result<Option<SettingsFile>, ConfigError> {
    load_first(workspace_root, CONFIG_FILES)
}

pub fn load_local_settings(workspace_root: &Path) -> Result<Option<SettingsFile>, ConfigError> {
    load_first(workspace_root, &[LOCAL_CONFIG_FILE])
}

fn load_first(dir: &Path, names: &[&str]) -> Result<Option<SettingsFile>, ConfigError> {
    for name in names {
        let path = dir.join(name);
        if path.is_file() {
            return load_settings_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Parse one settings file.
pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(SettingsFile::default());
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Walk up from `start` to the nearest directory holding a workspace
/// settings file.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| {
            CONFIG_FILES
                .iter()
                .chain(std::iter::once(&LOCAL_CONFIG_FILE))
                .any(|name| dir.join(name).is_file())
        })
        .map(Path::to_path_buf)
}
