// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shell provider: pipes the task to a local program's stdin and returns its
//! stdout. With the default `sh` executable the task is run as a script.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::factory::ProviderFactory;
use crate::parser::TextParser;
use crate::provider::{BaseProvider, ProviderHooks, SharedProvider};
use crate::schema::{presets, ConfigManager, ConfigSchema, PropertySchema};
use crate::strategy::{CliConfig, CliStrategy};
use crate::types::{
    Capabilities, CommunicationRequest, CommunicationResponse, ConfigMap, ExecutionOptions,
    ExecutionResult, ProviderMetadata,
};

use super::{invalid_override, string_list, BUILTIN_VERSION};

pub const PROVIDER_TYPE: &str = "shell";

/// Builds shell providers.
#[derive(Clone)]
pub struct ShellFactory {
    manager: Arc<ConfigManager>,
}

impl ShellFactory {
    pub fn new() -> Self {
        let manager = presets::cli().extend(
            ConfigSchema::new()
                .property(
                    "executable",
                    PropertySchema::string().min_length(1).default_value("sh"),
                )
                .property(
                    "maxBufferSize",
                    PropertySchema::integer().range(Some(1.0), None),
                )
                .property("killSignal", PropertySchema::string()),
            ConfigMap::new(),
        );
        Self {
            manager: Arc::new(manager),
        }
    }
}

impl Default for ShellFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory for ShellFactory {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::new(PROVIDER_TYPE, "Shell", BUILTIN_VERSION)
            .with_description("Runs a local program with the task on stdin")
            .with_features(["command-execution"])
            .with_config_schema(self.manager.describe())
    }

    fn config_manager(&self) -> Option<Arc<ConfigManager>> {
        Some(self.manager.clone())
    }

    fn build(&self, config: ConfigMap) -> Result<SharedProvider, ProviderError> {
        let strategy = CliStrategy::new(CliConfig::from_config(&config)?)?;
        Ok(Arc::new(
            BaseProvider::new(
                PROVIDER_TYPE,
                "Shell",
                Arc::new(strategy),
                Arc::new(TextParser::new()),
                self.manager.clone(),
                ShellHooks,
            )
            .with_config(config),
        ))
    }
}

pub struct ShellHooks;

impl ProviderHooks for ShellHooks {
    fn prepare_request(
        &self,
        options: &ExecutionOptions,
    ) -> Result<CommunicationRequest, ProviderError> {
        let scoped = options.scoped(PROVIDER_TYPE);
        let args = string_list(PROVIDER_TYPE, "args", scoped.get("args").cloned())?;

        let mut request =
            CommunicationRequest::cli(args).with_body(Value::String(options.task.clone()));

        if let Some(dir) = scoped.get("workingDirectory") {
            let dir = dir
                .as_str()
                .ok_or_else(|| invalid_override(PROVIDER_TYPE, "workingDirectory", "a string"))?;
            request = request.with_working_directory(dir);
        }
        if let Some(timeout) = scoped.get("timeout") {
            let timeout = timeout
                .as_u64()
                .ok_or_else(|| invalid_override(PROVIDER_TYPE, "timeout", "an integer"))?;
            request = request.with_timeout(timeout);
        }
        if let Some(env) = scoped.get("env") {
            let env = env
                .as_object()
                .ok_or_else(|| invalid_override(PROVIDER_TYPE, "env", "an object"))?;
            for (key, value) in env {
                request = request.with_env(key.clone(), value.clone());
            }
        }
        Ok(request)
    }

    fn format_result(
        &self,
        parsed: Value,
        response: &CommunicationResponse,
        duration_ms: u64,
    ) -> Result<ExecutionResult, ProviderError> {
        let output = parsed.as_str().unwrap_or_default().to_string();
        Ok(ExecutionResult::success(output, duration_ms).with_details(json!({
            "exitCode": response.status,
            "stderr": response.metadata.get("stderr"),
        })))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            execution_modes: vec!["batch".into()],
            file_types: vec!["*".into()],
            supports_streaming: false,
            runs_locally: true,
            requires_internet: false,
            features: vec!["command-execution".into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_request_pipes_task() {
        let options = ExecutionOptions::new("echo hi")
            .with_override(PROVIDER_TYPE, "args", json!(["-e"]))
            .with_override(PROVIDER_TYPE, "env", json!({"A": 1}));
        let request = ShellHooks.prepare_request(&options).unwrap();
        assert_eq!(request.body, Some(json!("echo hi")));
        assert_eq!(request.args, vec!["-e"]);
        assert_eq!(request.env["A"], 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_task_as_script() {
        let provider = ShellFactory::new().create(None).ok().unwrap();
        let result = provider
            .execute(ExecutionOptions::new("echo hello; echo world"))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, "hello\nworld\n");
        assert_eq!(result.details.unwrap()["exitCode"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_script_reports_stderr() {
        let provider = ShellFactory::new().create(None).ok().unwrap();
        let result = provider
            .execute(ExecutionOptions::new("echo nope >&2; exit 5"))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("nope"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_custom_executable() {
        let config = json!({"executable": "cat"});
        let provider = ShellFactory::new().create(config.as_object()).ok().unwrap();
        let result = provider.execute(ExecutionOptions::new("verbatim")).await;
        assert_eq!(result.output, "verbatim");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = json!({"executable": ""});
        assert!(ShellFactory::new().create(config.as_object()).is_err());
    }
}
