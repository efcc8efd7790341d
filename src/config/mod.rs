// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Settings for the `relay` binary.
//!
//! Sources, lowest precedence first:
//! - Global: `~/.relay/config.json` or `~/.relay/config.yaml`
//! - Workspace: `.relay.json`, `.relay.yaml`, or `relay.config.json`
//! - Local: `.relay.local.json` (gitignored, personal overrides)
//! - CLI options

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, global_config_dir, load_global_settings, load_local_settings,
    load_settings_file, load_workspace_settings, CONFIG_FILES, GLOBAL_CONFIG_DIR,
    GLOBAL_CONFIG_FILES, LOCAL_CONFIG_FILE,
};
pub use merger::{merge_settings, CliOptions};
pub use types::{RelaySettings, SettingsFile};

use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;
use crate::registry::ProviderRegistry;

/// Load and merge every settings source for a workspace.
pub fn load_settings(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<RelaySettings, ConfigError> {
    let global = load_global_settings()?;
    let workspace = load_workspace_settings(workspace_root)?;
    let local = load_local_settings(workspace_root)?;
    Ok(merge_settings(global, workspace, local, cli_options))
}

/// Registry with the configured external packages, discovered if enabled.
pub fn registry_from_settings(settings: &RelaySettings) -> ProviderRegistry {
    let registry =
        ProviderRegistry::new().with_external_providers(settings.external_packages.iter().cloned());
    if settings.discover {
        let report = registry.discover_providers();
        debug!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "Discovered providers"
        );
    }
    registry
}
