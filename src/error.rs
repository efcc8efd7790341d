// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for Relay.
//!
//! The execution path uses a single tagged error, [`ProviderError`], which is
//! always returned as data from `Provider::execute`. Registry and factory
//! operations fail fast with [`RegistryError`], and settings files fail with
//! [`ConfigError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Broad category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Bad input from the caller. Never retryable.
    Validation,
    /// Transport, status, or network failure.
    Communication,
    /// The response could not be decoded.
    Parsing,
    /// Uncategorized or internal provider failure.
    Provider,
    /// A catalog operation failed.
    Registry,
    /// Provider configuration did not match its schema.
    Configuration,
}

impl ErrorKind {
    /// Lowercase tag used in serialized errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Communication => "communication",
            Self::Parsing => "parsing",
            Self::Provider => "provider",
            Self::Registry => "registry",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known error codes.
pub mod codes {
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
    pub const INVALID_TASK: &str = "INVALID_TASK";
    pub const INVALID_OPTION: &str = "INVALID_OPTION";
    pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
    pub const TYPE_MISMATCH: &str = "TYPE_MISMATCH";
    pub const PROVIDER_CREATION_FAILED: &str = "PROVIDER_CREATION_FAILED";
    pub const PACKAGE_NOT_INSTALLED: &str = "PACKAGE_NOT_INSTALLED";
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";
    pub const HTTP_ERROR: &str = "HTTP_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const SPAWN_FAILED: &str = "SPAWN_FAILED";
    pub const PROCESS_FAILED: &str = "PROCESS_FAILED";
    pub const IO_ERROR: &str = "IO_ERROR";
    pub const INVALID_JSON: &str = "INVALID_JSON";
    pub const UNSUPPORTED_RESPONSE: &str = "UNSUPPORTED_RESPONSE";
}

type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Tagged provider error: `{kind, code, message, details?, cause?}`.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
    #[source]
    pub cause: Option<BoxedCause>,
}

impl ProviderError {
    /// Create an error with an explicit kind and code.
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn communication(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Communication, code, message)
    }

    pub fn parsing(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, code, message)
    }

    pub fn configuration(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, code, message)
    }

    /// Uncategorized failure.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provider, codes::UNKNOWN_ERROR, message)
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach the underlying cause.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Normalize any error into a `ProviderError`.
    ///
    /// A `ProviderError` wrapped in the `anyhow::Error` is recovered as-is;
    /// anything else becomes `kind=provider, code=UNKNOWN_ERROR`.
    pub fn normalize(err: anyhow::Error) -> Self {
        match err.downcast::<ProviderError>() {
            Ok(provider_err) => provider_err,
            Err(other) => Self::unknown(other.to_string()).with_details(json!({
                "chain": other.chain().skip(1).map(|c| c.to_string()).collect::<Vec<_>>(),
            })),
        }
    }

    /// Validation and configuration errors never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, ErrorKind::Validation | ErrorKind::Configuration)
    }

    /// Serializable view of this error (cause flattened to its message).
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "kind": self.kind,
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = &self.details {
            value["details"] = details.clone();
        }
        if let Some(cause) = &self.cause {
            value["cause"] = Value::String(cause.to_string());
        }
        value
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(err: anyhow::Error) -> Self {
        Self::normalize(err)
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::communication(codes::IO_ERROR, err.to_string()).with_cause(err)
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::parsing(codes::INVALID_JSON, format!("Invalid JSON: {err}")).with_cause(err)
    }
}

/// Errors raised by registry operations.
///
/// These are setup mistakes and are returned eagerly rather than folded into
/// execution results.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid provider metadata for '{provider_type}': {field} {message}")]
    InvalidMetadata {
        provider_type: String,
        field: String,
        message: String,
    },

    #[error("Provider '{provider_type}' is already registered (existing: {existing_name})")]
    Conflict {
        provider_type: String,
        existing_name: String,
    },

    #[error("Provider '{provider_type}' not found")]
    NotFound {
        provider_type: String,
        available_types: Vec<String>,
    },

    #[error("Provider '{provider_type}' is registered lazily and has not been loaded; use create_provider_async")]
    LazyNotLoaded { provider_type: String },

    #[error("Failed to create provider '{provider_type}': {source}")]
    CreationFailed {
        provider_type: String,
        #[source]
        source: ProviderError,
    },

    #[error("Provider discovery failed for '{source_name}': {message}")]
    DiscoveryFailed { source_name: String, message: String },
}

impl RegistryError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMetadata { .. } => "INVALID_METADATA",
            Self::Conflict { .. } => "PROVIDER_CONFLICT",
            Self::NotFound { .. } => "PROVIDER_NOT_FOUND",
            Self::LazyNotLoaded { .. } => "LAZY_PROVIDER_NOT_LOADED",
            Self::CreationFailed { .. } => "PROVIDER_CREATION_FAILED",
            Self::DiscoveryFailed { .. } => "DISCOVERY_FAILED",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Registry
    }

    /// The provider type (or discovery source) the error is about.
    pub fn provider_type(&self) -> &str {
        match self {
            Self::InvalidMetadata { provider_type, .. }
            | Self::Conflict { provider_type, .. }
            | Self::NotFound { provider_type, .. }
            | Self::LazyNotLoaded { provider_type }
            | Self::CreationFailed { provider_type, .. } => provider_type,
            Self::DiscoveryFailed { source_name, .. } => source_name,
        }
    }

    /// Contextual details for callers and logs.
    pub fn details(&self) -> Value {
        match self {
            Self::InvalidMetadata { provider_type, field, message } => json!({
                "type": provider_type,
                "field": field,
                "reason": message,
            }),
            Self::Conflict { provider_type, existing_name } => json!({
                "type": provider_type,
                "existingName": existing_name,
            }),
            Self::NotFound { provider_type, available_types } => json!({
                "type": provider_type,
                "availableTypes": available_types,
            }),
            Self::LazyNotLoaded { provider_type } => json!({ "type": provider_type }),
            Self::CreationFailed { provider_type, source } => json!({
                "type": provider_type,
                "cause": source.to_json(),
            }),
            Self::DiscoveryFailed { source_name, message } => json!({
                "source": source_name,
                "cause": message,
            }),
        }
    }
}

/// Errors that can occur while loading settings files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
