// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Built-in providers.
//!
//! - [`claude_code`] - Claude Code CLI (`claude -p --output-format json`)
//! - [`openai_compatible`] - any `/chat/completions` HTTP API
//! - [`shell`] - pipes the task to a local program's stdin
//!
//! Discovery registers each of them lazily; nothing is constructed until a
//! provider is first requested.

pub mod claude_code;
pub mod openai_compatible;
pub mod shell;

pub use claude_code::ClaudeCodeFactory;
pub use openai_compatible::OpenAiCompatibleFactory;
pub use shell::ShellFactory;

use std::sync::Arc;

use serde_json::Value;

use crate::error::{codes, ProviderError};
use crate::factory::{ProviderFactory, SharedFactory};
use crate::registry::{lazy_loader, LazyLoader};
use crate::types::ProviderMetadata;

/// Version stamped into built-in metadata.
pub(crate) const BUILTIN_VERSION: &str = env!("CARGO_PKG_VERSION");

fn lazy<F>(factory: F) -> (ProviderMetadata, LazyLoader)
where
    F: ProviderFactory + Clone + 'static,
{
    let metadata = factory.metadata();
    let loader = lazy_loader(move || {
        let factory = factory.clone();
        async move { Ok(Arc::new(factory) as SharedFactory) }
    });
    (metadata, loader)
}

/// Metadata and loaders for every built-in provider.
pub fn builtin_providers() -> Vec<(ProviderMetadata, LazyLoader)> {
    vec![
        lazy(ClaudeCodeFactory::new()),
        lazy(OpenAiCompatibleFactory::new()),
        lazy(ShellFactory::new()),
    ]
}

/// Override value of the wrong type.
pub(crate) fn invalid_override(provider_type: &str, key: &str, expected: &str) -> ProviderError {
    ProviderError::validation(
        codes::INVALID_OPTION,
        format!("{provider_type}.{key} must be {expected}"),
    )
}

/// Optional string argument list from an override or config.
pub(crate) fn string_list(
    provider_type: &str,
    key: &str,
    value: Option<Value>,
) -> Result<Vec<String>, ProviderError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(invalid_override(provider_type, key, "an array of strings")),
            })
            .collect(),
        Some(Value::String(s)) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Some(_) => Err(invalid_override(provider_type, key, "an array of strings")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_metadata_is_valid() {
        let builtins = builtin_providers();
        let types: Vec<&str> = builtins
            .iter()
            .map(|(m, _)| m.provider_type.as_str())
            .collect();
        assert_eq!(types, vec!["claude-code", "openai-compatible", "shell"]);
        for (metadata, _) in &builtins {
            assert!(crate::registry::validate_metadata(metadata).is_ok());
            assert!(!metadata.is_external());
            assert!(metadata.config_schema.is_some());
        }
    }

    #[tokio::test]
    async fn test_builtin_loaders_produce_matching_factories() {
        for (metadata, loader) in builtin_providers() {
            let factory = loader().await.unwrap();
            assert_eq!(factory.metadata(), metadata);
        }
    }

    #[test]
    fn test_string_list() {
        assert_eq!(
            string_list("t", "args", Some(json!(["-a", "b"]))).unwrap(),
            vec!["-a", "b"]
        );
        assert_eq!(string_list("t", "args", Some(json!("-x -y"))).unwrap(), vec!["-x", "-y"]);
        assert!(string_list("t", "args", Some(json!([1]))).is_err());
        assert!(string_list("t", "args", None).unwrap().is_empty());
    }
}
