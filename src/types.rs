// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core type definitions for Relay.
//!
//! This module contains the value objects that cross the provider boundary:
//! - [`ExecutionOptions`] / [`ExecutionResult`] - the uniform execute contract
//! - [`CommunicationRequest`] / [`CommunicationResponse`] - transport-agnostic
//!   request and response passed to communication strategies
//! - [`ProviderMetadata`] - catalog entry describing a provider type
//! - [`Capabilities`] - what a provider instance can do

use std::collections::{BTreeMap, BTreeSet, HashMap};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider configuration: a JSON object.
pub type ConfigMap = serde_json::Map<String, Value>;

// ============================================================================
// Execution Contract
// ============================================================================

/// Options for a single provider execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// The task to perform. Must be non-empty after trimming.
    pub task: String,

    /// Sampling temperature, in `[0, 2]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Maximum tokens to generate, at least 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub verbose: bool,

    /// Provider-scoped overrides keyed `"<type>.<option>"`.
    #[serde(default, flatten)]
    pub overrides: BTreeMap<String, Value>,
}

impl ExecutionOptions {
    /// Create options for a task.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set a provider-scoped override, e.g. `("shell", "executable", "cat")`.
    pub fn with_override(
        mut self,
        provider_type: &str,
        option: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.overrides
            .insert(format!("{provider_type}.{option}"), value.into());
        self
    }

    /// Overrides addressed to `provider_type`, with the prefix stripped.
    pub fn scoped(&self, provider_type: &str) -> ConfigMap {
        let prefix = format!("{provider_type}.");
        self.overrides
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_string(), value.clone()))
            })
            .collect()
    }
}

/// Result of a provider execution. Failures are data, never panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ExecutionResult {
    /// Create a successful result.
    pub fn success(output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration_ms,
            details: None,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ============================================================================
// Communication Types
// ============================================================================

/// Transport-agnostic request handed to a communication strategy.
///
/// HTTP strategies read `endpoint`/`method`/`headers`/`body`; CLI strategies
/// read `args`/`working_directory`/`env`/`body` (piped to stdin).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, Value>,
    /// Per-request timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub options: ConfigMap,
}

impl CommunicationRequest {
    /// Request against an HTTP endpoint.
    pub fn http(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            endpoint: Some(endpoint.into()),
            ..Default::default()
        }
    }

    /// Request running a command with arguments.
    pub fn cli<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }
}

/// Transport-agnostic response returned by a communication strategy.
///
/// For CLI strategies `status` is the process exit code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationResponse {
    pub status: i32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
    /// Wall-clock duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub metadata: ConfigMap,
}

impl CommunicationResponse {
    /// Body as text, when the body is a JSON string.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_str()
    }

    /// Metadata flag lookup, `false` when absent.
    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

// ============================================================================
// Provider Catalog Types
// ============================================================================

/// Catalog entry describing a provider type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    /// Unique id, matching `[a-zA-Z0-9_-]+`.
    #[serde(rename = "type")]
    pub provider_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub supported_features: BTreeSet<String>,
    /// Present for providers shipped in external packages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_external: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
}

impl ProviderMetadata {
    pub fn new(
        provider_type: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            provider_type: provider_type.into(),
            name: name.into(),
            description: String::new(),
            version: version.into(),
            supported_features: BTreeSet::new(),
            package_name: None,
            requires_external: None,
            config_schema: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_features
            .extend(features.into_iter().map(Into::into));
        self
    }

    pub fn with_package(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = Some(package_name.into());
        self.requires_external = Some(true);
        self
    }

    pub fn with_config_schema(mut self, schema: Value) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// External providers carry the package they come from.
    pub fn is_external(&self) -> bool {
        self.package_name.is_some()
    }

    pub fn supports(&self, feature: &str) -> bool {
        self.supported_features.contains(feature)
    }
}

/// Check a provider type id against `[a-zA-Z0-9_-]+`.
pub fn is_valid_provider_type(provider_type: &str) -> bool {
    static PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").ok());
    PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(provider_type))
}

/// What a provider instance can do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// e.g. `"batch"`, `"interactive"`.
    pub execution_modes: Vec<String>,
    /// File extensions or `"*"`.
    pub file_types: Vec<String>,
    pub supports_streaming: bool,
    pub runs_locally: bool,
    pub requires_internet: bool,
    pub features: Vec<String>,
}
