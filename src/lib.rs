// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Relay - a pluggable provider layer for AI coding agents.
//!
//! Every agent, whether a remote HTTP API or a local CLI, is driven through
//! one [`Provider`] contract: `execute`, `test_connection`,
//! `validate_config`. Providers are built by factories and catalogued in a
//! [`ProviderRegistry`] that caches instances by `(type, config)`.
//!
//! # Architecture
//!
//! - [`types`] - execution options and results, transport requests and
//!   responses, provider metadata
//! - [`error`] - [`ProviderError`], [`RegistryError`], [`ConfigError`]
//! - [`strategy`] - transports: [`HttpStrategy`], [`CliStrategy`]
//! - [`parser`] - response decoding: JSON, text, SSE/JSON-lines
//! - [`schema`] - provider config schemas, defaults, validation
//! - [`provider`] - the [`Provider`] trait and [`BaseProvider`] pipeline
//! - [`factory`] - [`ProviderFactory`]: metadata plus construction
//! - [`registry`] - registration, lazy loading, discovery, caching
//! - [`providers`] - built-in providers
//! - [`config`] - settings files for the `relay` binary
//! - [`telemetry`] - tracing setup and metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use relay::{create_default_registry, ExecutionOptions};
//!
//! let registry = create_default_registry();
//! let provider = registry.create_provider_async("shell", None).await?;
//! let result = provider.execute(ExecutionOptions::new("echo hi")).await;
//! assert_eq!(result.output, "hi\n");
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod parser;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod schema;
pub mod strategy;
pub mod telemetry;
pub mod types;

pub use error::{ConfigError, ErrorKind, ProviderError, RegistryError, Result};
pub use factory::{ProviderFactory, SharedFactory, SimpleProviderFactory};
pub use parser::{JsonParser, ResponseParser, StreamParser, TextParser};
pub use provider::{BaseProvider, Provider, ProviderHooks, SharedProvider};
pub use registry::{create_default_registry, ProviderRegistry, RegistryStats};
pub use schema::{ConfigManager, ConfigSchema, PropertySchema};
pub use strategy::{CliStrategy, CommunicationStrategy, HttpStrategy};
pub use types::{
    Capabilities, CommunicationRequest, CommunicationResponse, ConfigMap, ExecutionOptions,
    ExecutionResult, ProviderMetadata,
};
