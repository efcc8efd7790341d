// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider registry.
//!
//! The registry catalogs provider factories, registered eagerly or behind a
//! lazy loader, and caches constructed providers by `(type, config)`.
//!
//! Per type, a provider moves through:
//!
//! ```text
//! Unregistered -> Registered (eager)                     -> Cached
//! Unregistered -> RegisteredLazy -> Loaded (promoted)    -> Cached
//! ```
//!
//! Registry operations fail fast with [`RegistryError`]; they represent setup
//! mistakes rather than request-time failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay::registry::create_default_registry;
//! use relay::types::ExecutionOptions;
//!
//! let registry = create_default_registry();
//! let provider = registry.create_provider_async("shell", None).await?;
//! let result = provider.execute(ExecutionOptions::new("echo hi")).await;
//! ```

mod cache;
mod loader;
mod validation;

pub use cache::{cache_key, stable_serialize};
pub use loader::{
    known_external_providers, lazy_loader, package_name_for, ExternalProviderSpec, LazyLoader,
    LoaderFuture, ModuleLoader, StaticModuleLoader, PACKAGE_PREFIX,
};
pub use validation::{metadata_from_value, validate_metadata};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{codes, ProviderError, RegistryError};
use crate::factory::SharedFactory;
use crate::provider::SharedProvider;
use crate::types::{ConfigMap, ProviderMetadata};

#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;

/// A lazily registered provider. The cell memoizes the loaded factory and
/// serializes concurrent first loads.
struct LazyEntry {
    metadata: ProviderMetadata,
    loader: LazyLoader,
    loaded: OnceCell<SharedFactory>,
}

#[derive(Default)]
struct RegistryState {
    /// Metadata of every registered type, eager or lazy.
    metadata: BTreeMap<String, ProviderMetadata>,
    /// Eager factories and loaded lazy factories.
    factories: HashMap<String, SharedFactory>,
    /// Lazy entries not yet promoted.
    lazy: HashMap<String, Arc<LazyEntry>>,
    cache: HashMap<String, SharedProvider>,
    discovered: bool,
}

impl RegistryState {
    fn check_conflict(&self, provider_type: &str) -> Result<(), RegistryError> {
        match self.metadata.get(provider_type) {
            Some(existing) => Err(RegistryError::Conflict {
                provider_type: provider_type.to_string(),
                existing_name: existing.name.clone(),
            }),
            None => Ok(()),
        }
    }

    fn not_found(&self, provider_type: &str) -> RegistryError {
        RegistryError::NotFound {
            provider_type: provider_type.to_string(),
            available_types: self.metadata.keys().cloned().collect(),
        }
    }
}

async fn load_entry(entry: &LazyEntry) -> Result<SharedFactory, ProviderError> {
    let provider_type = &entry.metadata.provider_type;
    debug!(provider = %provider_type, "Loading lazy provider");
    let factory = (entry.loader)().await?;
    let loaded_type = factory.metadata().provider_type;
    if &loaded_type != provider_type {
        return Err(ProviderError::configuration(
            codes::TYPE_MISMATCH,
            format!("Loader for '{provider_type}' produced a factory for '{loaded_type}'"),
        ));
    }
    Ok(factory)
}

/// Outcome of a discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Types registered by this pass.
    pub registered: Vec<String>,
    /// Types skipped: already registered, or package not installed.
    pub skipped: Vec<String>,
    /// Sources that failed to register.
    pub failures: Vec<RegistryError>,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.skipped.is_empty() && self.failures.is_empty()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Registered types, eager and lazy.
    pub total: usize,
    /// Types with a factory ready (eager or loaded).
    pub loaded: usize,
    /// Lazy types not yet loaded.
    pub lazy: usize,
    /// Constructed provider instances.
    pub cached: usize,
    pub built_in: usize,
    pub external: usize,
    /// Feature name to number of providers supporting it.
    pub features: BTreeMap<String, usize>,
}

/// Catalog of provider factories with an instance cache.
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
    module_loader: Arc<dyn ModuleLoader>,
    external_providers: Vec<ExternalProviderSpec>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Empty registry probing the known external packages through a
    /// [`StaticModuleLoader`] with no modules.
    pub fn new() -> Self {
        Self::with_module_loader(Arc::new(StaticModuleLoader::new()))
    }

    pub fn with_module_loader(module_loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            module_loader,
            external_providers: known_external_providers(),
        }
    }

    /// Add external packages for discovery. A spec with an already listed
    /// type replaces the earlier one.
    pub fn with_external_providers<I>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = ExternalProviderSpec>,
    {
        for spec in specs {
            match self
                .external_providers
                .iter_mut()
                .find(|s| s.provider_type == spec.provider_type)
            {
                Some(existing) => *existing = spec,
                None => self.external_providers.push(spec),
            }
        }
        self
    }

    pub fn external_providers(&self) -> &[ExternalProviderSpec] {
        &self.external_providers
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register an eager factory.
    pub fn register_provider(&self, factory: SharedFactory) -> Result<(), RegistryError> {
        let metadata = factory.metadata();
        validate_metadata(&metadata)?;

        let mut state = self.write();
        state.check_conflict(&metadata.provider_type)?;
        let provider_type = metadata.provider_type.clone();
        state.factories.insert(provider_type.clone(), factory);
        state.metadata.insert(provider_type.clone(), metadata);
        debug!(provider = %provider_type, "Registered provider");
        Ok(())
    }

    /// Register a factory behind a loader. The metadata is visible
    /// immediately; the loader runs on first async creation.
    pub fn register_lazy_provider(
        &self,
        metadata: ProviderMetadata,
        loader: LazyLoader,
    ) -> Result<(), RegistryError> {
        validate_metadata(&metadata)?;

        let mut state = self.write();
        state.check_conflict(&metadata.provider_type)?;
        let provider_type = metadata.provider_type.clone();
        state.lazy.insert(
            provider_type.clone(),
            Arc::new(LazyEntry {
                metadata: metadata.clone(),
                loader,
                loaded: OnceCell::new(),
            }),
        );
        state.metadata.insert(provider_type.clone(), metadata);
        debug!(provider = %provider_type, "Registered lazy provider");
        Ok(())
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create (or fetch the cached) provider for `(type, config)`.
    ///
    /// Lazy providers must have been loaded by
    /// [`create_provider_async`](Self::create_provider_async) first.
    pub fn create_provider(
        &self,
        provider_type: &str,
        config: Option<&ConfigMap>,
    ) -> Result<SharedProvider, RegistryError> {
        let key = cache_key(provider_type, config);
        let factory = {
            let state = self.read();
            if let Some(provider) = state.cache.get(&key) {
                #[cfg(feature = "telemetry")]
                GLOBAL_METRICS.record_cache(true);
                return Ok(provider.clone());
            }
            if let Some(factory) = state.factories.get(provider_type) {
                factory.clone()
            } else if let Some(entry) = state.lazy.get(provider_type) {
                match entry.loaded.get() {
                    Some(factory) => factory.clone(),
                    None => {
                        return Err(RegistryError::LazyNotLoaded {
                            provider_type: provider_type.to_string(),
                        })
                    }
                }
            } else {
                return Err(state.not_found(provider_type));
            }
        };
        self.instantiate(provider_type, key, &factory, config)
    }

    /// Create (or fetch the cached) provider, loading a lazy factory if
    /// needed.
    pub async fn create_provider_async(
        &self,
        provider_type: &str,
        config: Option<&ConfigMap>,
    ) -> Result<SharedProvider, RegistryError> {
        let key = cache_key(provider_type, config);
        let cached = self.read().cache.get(&key).cloned();
        if let Some(provider) = cached {
            #[cfg(feature = "telemetry")]
            GLOBAL_METRICS.record_cache(true);
            return Ok(provider);
        }
        let factory = self.resolve_factory(provider_type).await?;
        self.instantiate(provider_type, key, &factory, config)
    }

    /// The factory for a type, running its lazy loader at most once.
    pub async fn resolve_factory(&self, provider_type: &str) -> Result<SharedFactory, RegistryError> {
        let entry = {
            let state = self.read();
            if let Some(factory) = state.factories.get(provider_type) {
                return Ok(factory.clone());
            }
            match state.lazy.get(provider_type) {
                Some(entry) => entry.clone(),
                None => return Err(state.not_found(provider_type)),
            }
        };

        let factory = entry
            .loaded
            .get_or_try_init(|| load_entry(&entry))
            .await
            .map_err(|source| {
                warn!(provider = %provider_type, error = %source, "Lazy provider failed to load");
                RegistryError::CreationFailed {
                    provider_type: provider_type.to_string(),
                    source,
                }
            })?
            .clone();

        let mut state = self.write();
        if state
            .lazy
            .get(provider_type)
            .is_some_and(|current| Arc::ptr_eq(current, &entry))
        {
            state.lazy.remove(provider_type);
            state
                .factories
                .insert(provider_type.to_string(), factory.clone());
            info!(provider = %provider_type, "Loaded lazy provider");
        }
        Ok(factory)
    }

    fn instantiate(
        &self,
        provider_type: &str,
        key: String,
        factory: &SharedFactory,
        config: Option<&ConfigMap>,
    ) -> Result<SharedProvider, RegistryError> {
        let provider = factory
            .create(config)
            .map_err(|source| RegistryError::CreationFailed {
                provider_type: provider_type.to_string(),
                source,
            })?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_cache(false);

        let mut state = self.write();
        let cached = state.cache.entry(key).or_insert(provider).clone();
        debug!(provider = %provider_type, cached = state.cache.len(), "Created provider");
        Ok(cached)
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Register built-in providers and installed external packages, all
    /// lazily. Runs once per registry; later calls return an empty report.
    pub fn discover_providers(&self) -> DiscoveryReport {
        {
            let mut state = self.write();
            if state.discovered {
                return DiscoveryReport::default();
            }
            state.discovered = true;
        }

        let mut report = DiscoveryReport::default();

        for (metadata, loader) in crate::providers::builtin_providers() {
            self.register_discovered(metadata, loader, &mut report);
        }

        for spec in &self.external_providers {
            let package = spec.package();
            if let Err(e) = self.module_loader.resolve(&package) {
                info!(provider = %spec.provider_type, package = %package, error = %e, "External provider not installed, skipping");
                report.skipped.push(spec.provider_type.clone());
                continue;
            }
            let module_loader = self.module_loader.clone();
            let loader = lazy_loader(move || {
                let module_loader = module_loader.clone();
                let package = package.clone();
                async move { module_loader.load(&package).await }
            });
            self.register_discovered(spec.metadata(), loader, &mut report);
        }

        for failure in &report.failures {
            warn!(
                provider = %failure.provider_type(),
                code = failure.code(),
                error = %failure,
                "Provider discovery failed"
            );
        }
        info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "Provider discovery complete"
        );
        report
    }

    fn register_discovered(
        &self,
        metadata: ProviderMetadata,
        loader: LazyLoader,
        report: &mut DiscoveryReport,
    ) {
        let provider_type = metadata.provider_type.clone();
        match self.register_lazy_provider(metadata, loader) {
            Ok(()) => report.registered.push(provider_type),
            Err(RegistryError::Conflict { .. }) => report.skipped.push(provider_type),
            Err(e) => report.failures.push(RegistryError::DiscoveryFailed {
                source_name: provider_type,
                message: e.to_string(),
            }),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.read().metadata.contains_key(provider_type)
    }

    /// Metadata of every registered provider, sorted by type.
    pub fn available_providers(&self) -> Vec<ProviderMetadata> {
        self.read().metadata.values().cloned().collect()
    }

    pub fn providers_by_feature(&self, feature: &str) -> Vec<ProviderMetadata> {
        self.read()
            .metadata
            .values()
            .filter(|m| m.supports(feature))
            .cloned()
            .collect()
    }

    pub fn provider_metadata(&self, provider_type: &str) -> Option<ProviderMetadata> {
        self.read().metadata.get(provider_type).cloned()
    }

    /// Registered type ids, sorted.
    pub fn registered_providers(&self) -> Vec<String> {
        self.read().metadata.keys().cloned().collect()
    }

    /// Whether a type is registered lazily and not yet loaded.
    pub fn is_lazy(&self, provider_type: &str) -> bool {
        self.read().lazy.contains_key(provider_type)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.read();
        let mut stats = RegistryStats {
            total: state.metadata.len(),
            loaded: state.factories.len(),
            lazy: state.lazy.len(),
            cached: state.cache.len(),
            ..Default::default()
        };
        for metadata in state.metadata.values() {
            if metadata.is_external() {
                stats.external += 1;
            } else {
                stats.built_in += 1;
            }
            for feature in &metadata.supported_features {
                *stats.features.entry(feature.clone()).or_default() += 1;
            }
        }
        stats
    }

    // ========================================================================
    // Reset
    // ========================================================================

    /// Drop everything, including the discovery flag.
    pub fn clear(&self) {
        *self.write() = RegistryState::default();
        debug!("Registry cleared");
    }

    /// Drop constructed providers only.
    pub fn clear_cache(&self) {
        self.write().cache.clear();
    }
}

/// Registry with built-in and installed external providers discovered.
pub fn create_default_registry() -> ProviderRegistry {
    let registry = ProviderRegistry::new();
    registry.discover_providers();
    registry
}
