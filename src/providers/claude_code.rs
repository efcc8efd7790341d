// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Claude Code CLI provider.
//!
//! Runs `claude -p --output-format json [--model M] [--max-turns N] <task>`
//! and reads the `result` field of the JSON summary it prints.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{codes, ErrorKind, ProviderError};
use crate::factory::ProviderFactory;
use crate::parser::JsonParser;
use crate::provider::{BaseProvider, ProviderHooks, SharedProvider};
use crate::schema::{presets, ConfigManager, ConfigSchema, PropertySchema};
use crate::strategy::{CliConfig, CliStrategy};
use crate::types::{
    Capabilities, CommunicationRequest, CommunicationResponse, ConfigMap, ExecutionOptions,
    ExecutionResult, ProviderMetadata,
};

use super::{invalid_override, BUILTIN_VERSION};

pub const PROVIDER_TYPE: &str = "claude-code";

const FEATURES: &[&str] = &[
    "code-generation",
    "code-editing",
    "code-review",
    "file-operations",
];

fn config_manager() -> ConfigManager {
    presets::cli().extend(
        ConfigSchema::new()
            .property(
                "executable",
                PropertySchema::string().min_length(1).default_value("claude"),
            )
            .property("model", PropertySchema::string().describe("Model alias or id"))
            .property(
                "maxTurns",
                PropertySchema::integer()
                    .range(Some(1.0), None)
                    .describe("Maximum agent turns"),
            )
            .property(
                "timeout",
                PropertySchema::integer()
                    .range(Some(1.0), None)
                    .default_value(600_000),
            ),
        ConfigMap::new(),
    )
}

/// Builds Claude Code providers.
#[derive(Clone)]
pub struct ClaudeCodeFactory {
    manager: Arc<ConfigManager>,
}

impl ClaudeCodeFactory {
    pub fn new() -> Self {
        Self {
            manager: Arc::new(config_manager()),
        }
    }
}

impl Default for ClaudeCodeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory for ClaudeCodeFactory {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::new(PROVIDER_TYPE, "Claude Code", BUILTIN_VERSION)
            .with_description("Anthropic's Claude Code agent, run as a CLI subprocess")
            .with_features(FEATURES.iter().copied())
            .with_config_schema(self.manager.describe())
    }

    fn config_manager(&self) -> Option<Arc<ConfigManager>> {
        Some(self.manager.clone())
    }

    fn build(&self, config: ConfigMap) -> Result<SharedProvider, ProviderError> {
        let strategy = CliStrategy::new(CliConfig::from_config(&config)?)?;
        let hooks = ClaudeCodeHooks {
            model: config.get("model").and_then(Value::as_str).map(str::to_string),
            max_turns: config.get("maxTurns").and_then(Value::as_u64),
        };
        Ok(Arc::new(
            BaseProvider::new(
                PROVIDER_TYPE,
                "Claude Code",
                Arc::new(strategy),
                Arc::new(JsonParser::new()),
                self.manager.clone(),
                hooks,
            )
            .with_config(config),
        ))
    }
}

/// Request and result shaping for the Claude Code CLI.
pub struct ClaudeCodeHooks {
    model: Option<String>,
    max_turns: Option<u64>,
}

impl ProviderHooks for ClaudeCodeHooks {
    fn prepare_request(
        &self,
        options: &ExecutionOptions,
    ) -> Result<CommunicationRequest, ProviderError> {
        let scoped = options.scoped(PROVIDER_TYPE);
        let mut args: Vec<String> = vec!["-p".into(), "--output-format".into(), "json".into()];

        let model = match scoped.get("model") {
            Some(Value::String(m)) => Some(m.clone()),
            Some(_) => return Err(invalid_override(PROVIDER_TYPE, "model", "a string")),
            None => self.model.clone(),
        };
        if let Some(model) = model {
            args.extend(["--model".to_string(), model]);
        }

        let max_turns = match scoped.get("maxTurns") {
            Some(value) => Some(
                value
                    .as_u64()
                    .filter(|n| *n >= 1)
                    .ok_or_else(|| invalid_override(PROVIDER_TYPE, "maxTurns", "a positive integer"))?,
            ),
            None => self.max_turns,
        };
        if let Some(turns) = max_turns {
            args.extend(["--max-turns".to_string(), turns.to_string()]);
        }

        if options.verbose {
            args.push("--verbose".into());
        }
        args.push(options.task.clone());

        let mut request = CommunicationRequest::cli(args);
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
        Ok(request)
    }

    fn format_result(
        &self,
        parsed: Value,
        response: &CommunicationResponse,
        duration_ms: u64,
    ) -> Result<ExecutionResult, ProviderError> {
        let result_text = parsed.get("result").and_then(Value::as_str);

        if parsed.get("is_error").and_then(Value::as_bool) == Some(true) {
            let message = result_text
                .or_else(|| parsed.get("subtype").and_then(Value::as_str))
                .unwrap_or("Claude Code reported an error");
            return Err(
                ProviderError::new(ErrorKind::Provider, codes::PROCESS_FAILED, message)
                    .with_details(parsed.clone()),
            );
        }

        let output = result_text.ok_or_else(|| {
            ProviderError::parsing(
                codes::UNSUPPORTED_RESPONSE,
                "Claude Code output has no 'result' field",
            )
        })?;

        Ok(ExecutionResult::success(output, duration_ms).with_details(json!({
            "sessionId": parsed.get("session_id"),
            "costUsd": parsed.get("total_cost_usd"),
            "numTurns": parsed.get("num_turns"),
            "usage": parsed.get("usage"),
            "exitCode": response.status,
        })))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            execution_modes: vec!["batch".into()],
            file_types: vec!["*".into()],
            supports_streaming: false,
            runs_locally: true,
            requires_internet: true,
            features: FEATURES.iter().map(|f| f.to_string()).collect(),
        }
    }
}
