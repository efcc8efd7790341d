// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lazy loaders and external provider packages.
//!
//! A [`LazyLoader`] defers factory construction until first use. External
//! packages are resolved through a single [`ModuleLoader`] port, so tests and
//! embedders can decide what "installed" means.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{codes, ProviderError};
use crate::factory::SharedFactory;
use crate::types::ProviderMetadata;

/// Package name prefix for external providers.
pub const PACKAGE_PREFIX: &str = "relay-provider-";

/// Future produced by a lazy loader.
pub type LoaderFuture = BoxFuture<'static, Result<SharedFactory, ProviderError>>;

/// Deferred factory constructor.
pub type LazyLoader = Arc<dyn Fn() -> LoaderFuture + Send + Sync>;

/// Wrap an async closure as a [`LazyLoader`].
pub fn lazy_loader<F, Fut>(load: F) -> LazyLoader
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SharedFactory, ProviderError>> + Send + 'static,
{
    Arc::new(move || load().boxed())
}

/// Conventional package name for a provider type.
pub fn package_name_for(provider_type: &str) -> String {
    format!("{PACKAGE_PREFIX}{provider_type}")
}

fn not_installed(package: &str) -> ProviderError {
    ProviderError::configuration(
        codes::PACKAGE_NOT_INSTALLED,
        format!("Provider package '{package}' is not installed"),
    )
    .with_details(json!({ "packageName": package }))
}

/// Resolves external provider packages.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Check that a package is available without loading it.
    fn resolve(&self, package: &str) -> Result<(), ProviderError>;

    /// Load a package's factory.
    async fn load(&self, package: &str) -> Result<SharedFactory, ProviderError>;
}

type ModuleConstructor = dyn Fn() -> Result<SharedFactory, ProviderError> + Send + Sync;

/// Module loader over factories compiled into the binary.
#[derive(Default, Clone)]
pub struct StaticModuleLoader {
    modules: HashMap<String, Arc<ModuleConstructor>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `package` loadable.
    pub fn with_module<F>(mut self, package: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Result<SharedFactory, ProviderError> + Send + Sync + 'static,
    {
        self.modules.insert(package.into(), Arc::new(constructor));
        self
    }

    pub fn packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.modules.keys().cloned().collect();
        packages.sort();
        packages
    }
}

#[async_trait]
impl ModuleLoader for StaticModuleLoader {
    fn resolve(&self, package: &str) -> Result<(), ProviderError> {
        if self.modules.contains_key(package) {
            Ok(())
        } else {
            Err(not_installed(package))
        }
    }

    async fn load(&self, package: &str) -> Result<SharedFactory, ProviderError> {
        let constructor = self
            .modules
            .get(package)
            .ok_or_else(|| not_installed(package))?;
        constructor()
    }
}

/// Declaration of a provider shipped in an external package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProviderSpec {
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Defaults to `relay-provider-<type>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl ExternalProviderSpec {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            package_name: None,
            name: None,
            description: String::new(),
            version: None,
            features: Vec::new(),
        }
    }

    pub fn package(&self) -> String {
        self.package_name
            .clone()
            .unwrap_or_else(|| package_name_for(&self.provider_type))
    }

    /// Metadata announced before the package is loaded.
    pub fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::new(
            self.provider_type.clone(),
            self.name.clone().unwrap_or_else(|| self.provider_type.clone()),
            self.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
        )
        .with_description(self.description.clone())
        .with_features(self.features.iter().cloned())
        .with_package(self.package())
    }
}

/// External packages probed by discovery.
pub fn known_external_providers() -> Vec<ExternalProviderSpec> {
    let spec = |provider_type: &str, name: &str, description: &str, features: &[&str]| {
        ExternalProviderSpec {
            provider_type: provider_type.to_string(),
            package_name: None,
            name: Some(name.to_string()),
            description: description.to_string(),
            version: None,
            features: features.iter().map(|f| f.to_string()).collect(),
        }
    };
    vec![
        spec(
            "aider",
            "Aider",
            "Aider pair-programming CLI",
            &["code-generation", "code-editing", "git-integration"],
        ),
        spec(
            "codex",
            "Codex CLI",
            "OpenAI Codex command-line agent",
            &["code-generation", "code-editing"],
        ),
        spec(
            "gemini-cli",
            "Gemini CLI",
            "Google Gemini command-line agent",
            &["code-generation", "code-review"],
        ),
    ]
}
