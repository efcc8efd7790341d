// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider factories.
//!
//! A factory owns one [`ProviderMetadata`] and constructs providers of that
//! type. It holds no state across calls.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{codes, ErrorKind, ProviderError};
use crate::provider::SharedProvider;
use crate::schema::ConfigManager;
use crate::types::{ConfigMap, ProviderMetadata};

/// Constructs providers of one type.
pub trait ProviderFactory: Send + Sync {
    /// A copy of this factory's metadata.
    fn metadata(&self) -> ProviderMetadata;

    /// Config manager used to default and validate configs before `build`.
    fn config_manager(&self) -> Option<Arc<ConfigManager>> {
        None
    }

    /// Construct a provider from a resolved configuration.
    fn build(&self, config: ConfigMap) -> Result<SharedProvider, ProviderError>;

    /// Create a provider.
    ///
    /// A `type` field in `config` must name this factory's type. Any other
    /// failure is reported as `PROVIDER_CREATION_FAILED` carrying the cause.
    fn create(&self, config: Option<&ConfigMap>) -> Result<SharedProvider, ProviderError> {
        let metadata = self.metadata();
        let mut config = config.cloned().unwrap_or_default();

        if let Some(declared) = config.remove("type") {
            if declared.as_str() != Some(metadata.provider_type.as_str()) {
                return Err(ProviderError::configuration(
                    codes::TYPE_MISMATCH,
                    format!(
                        "Config type {declared} does not match provider type '{}'",
                        metadata.provider_type
                    ),
                )
                .with_details(json!({
                    "expected": metadata.provider_type,
                    "actual": declared,
                })));
            }
        }

        let resolved = match self.config_manager() {
            Some(manager) => manager
                .merge_with_defaults(&config)
                .map_err(|e| creation_failed(&metadata.provider_type, e))?,
            None => config,
        };

        self.build(resolved)
            .map_err(|e| creation_failed(&metadata.provider_type, e))
    }
}

fn creation_failed(provider_type: &str, cause: ProviderError) -> ProviderError {
    ProviderError::new(
        ErrorKind::Provider,
        codes::PROVIDER_CREATION_FAILED,
        format!("Failed to create provider '{provider_type}': {}", cause.message),
    )
    .with_details(json!({ "type": provider_type, "cause": cause.to_json() }))
    .with_cause(cause)
}

/// Shared factory handle.
pub type SharedFactory = Arc<dyn ProviderFactory>;

type Constructor = dyn Fn(ConfigMap) -> Result<SharedProvider, ProviderError> + Send + Sync;

/// Factory backed by a constructor closure, for providers that need no
/// custom setup.
#[derive(Clone)]
pub struct SimpleProviderFactory {
    metadata: ProviderMetadata,
    config_manager: Option<Arc<ConfigManager>>,
    constructor: Arc<Constructor>,
}

impl SimpleProviderFactory {
    pub fn new<F>(metadata: ProviderMetadata, constructor: F) -> Self
    where
        F: Fn(ConfigMap) -> Result<SharedProvider, ProviderError> + Send + Sync + 'static,
    {
        Self {
            metadata,
            config_manager: None,
            constructor: Arc::new(constructor),
        }
    }

    /// Validate and default configs with `manager` before construction.
    /// The manager's schema is published in the metadata.
    pub fn with_config_manager(mut self, manager: ConfigManager) -> Self {
        if self.metadata.config_schema.is_none() {
            self.metadata.config_schema = Some(manager.describe());
        }
        self.config_manager = Some(Arc::new(manager));
        self
    }
}

impl fmt::Debug for SimpleProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleProviderFactory")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl ProviderFactory for SimpleProviderFactory {
    fn metadata(&self) -> ProviderMetadata {
        self.metadata.clone()
    }

    fn config_manager(&self) -> Option<Arc<ConfigManager>> {
        self.config_manager.clone()
    }

    fn build(&self, config: ConfigMap) -> Result<SharedProvider, ProviderError> {
        (self.constructor)(config)
    }
}

/// Read a string field from a config map.
pub(crate) fn config_str<'a>(config: &'a ConfigMap, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}
