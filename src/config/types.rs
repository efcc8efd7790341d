// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Settings types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::ExternalProviderSpec;
use crate::types::ConfigMap;

/// One settings file as written on disk. Every field is optional so that
/// layers only override what they mention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFile {
    /// Provider used by `relay run` when no type is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Per-type provider configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<BTreeMap<String, ConfigMap>>,

    /// External packages probed in addition to the known list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_packages: Option<Vec<ExternalProviderSpec>>,

    /// Run provider discovery when building the registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discover: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Fully merged settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySettings {
    pub default_provider: Option<String>,
    pub providers: BTreeMap<String, ConfigMap>,
    pub external_packages: Vec<ExternalProviderSpec>,
    pub discover: bool,
    pub log_level: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            default_provider: None,
            providers: BTreeMap::new(),
            external_packages: Vec::new(),
            discover: true,
            log_level: "warn".to_string(),
        }
    }
}

impl RelaySettings {
    /// Configuration for one provider type, if any layer set one.
    pub fn provider_config(&self, provider_type: &str) -> Option<&ConfigMap> {
        self.providers.get(provider_type)
    }
}
