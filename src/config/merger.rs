// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Settings merging.
//!
//! Precedence, highest first: CLI options, local file, workspace file,
//! global file, defaults.

use std::collections::BTreeMap;

use crate::registry::ExternalProviderSpec;
use crate::schema::deep_merge;
use crate::types::ConfigMap;

use super::types::{RelaySettings, SettingsFile};

/// Settings that can come from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub default_provider: Option<String>,
    pub log_level: Option<String>,
    pub discover: Option<bool>,
    /// Per-type config from `--config` flags.
    pub providers: BTreeMap<String, ConfigMap>,
}

/// Merge every layer into resolved settings.
pub fn merge_settings(
    global: Option<SettingsFile>,
    workspace: Option<SettingsFile>,
    local: Option<SettingsFile>,
    cli: CliOptions,
) -> RelaySettings {
    let mut result = RelaySettings::default();

    for layer in [global, workspace, local].into_iter().flatten() {
        apply_settings_file(&mut result, layer);
    }
    apply_cli_options(&mut result, cli);

    result
}

fn apply_settings_file(result: &mut RelaySettings, file: SettingsFile) {
    if let Some(provider) = file.default_provider {
        result.default_provider = Some(provider);
    }
    if let Some(providers) = file.providers {
        merge_provider_configs(&mut result.providers, providers);
    }
    if let Some(packages) = file.external_packages {
        merge_external_packages(&mut result.external_packages, packages);
    }
    if let Some(discover) = file.discover {
        result.discover = discover;
    }
    if let Some(level) = file.log_level {
        result.log_level = level;
    }
}

fn apply_cli_options(result: &mut RelaySettings, cli: CliOptions) {
    if let Some(provider) = cli.default_provider {
        result.default_provider = Some(provider);
    }
    if let Some(level) = cli.log_level {
        result.log_level = level;
    }
    if let Some(discover) = cli.discover {
        result.discover = discover;
    }
    merge_provider_configs(&mut result.providers, cli.providers);
}

/// Deep-merge per provider type; later keys win, nested objects merge.
fn merge_provider_configs(
    target: &mut BTreeMap<String, ConfigMap>,
    source: BTreeMap<String, ConfigMap>,
) {
    for (provider_type, config) in source {
        deep_merge(target.entry(provider_type).or_default(), &config);
    }
}

/// Concatenate, with a later spec replacing an earlier one of the same type.
fn merge_external_packages(
    target: &mut Vec<ExternalProviderSpec>,
    source: Vec<ExternalProviderSpec>,
) {
    for spec in source {
        match target
            .iter_mut()
            .find(|s| s.provider_type == spec.provider_type)
        {
            Some(existing) => *existing = spec,
            None => target.push(spec),
        }
    }
}
