// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAI-compatible chat completions provider.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, and any other server that
//! implements `POST /chat/completions`.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{codes, ProviderError};
use crate::factory::{config_str, ProviderFactory};
use crate::parser::JsonParser;
use crate::provider::{BaseProvider, ProviderHooks, SharedProvider};
use crate::schema::{presets, ConfigManager, ConfigSchema, Format, PropertySchema};
use crate::strategy::{HttpConfig, HttpStrategy};
use crate::types::{
    Capabilities, CommunicationRequest, CommunicationResponse, ConfigMap, ExecutionOptions,
    ExecutionResult, ProviderMetadata,
};

use super::{invalid_override, BUILTIN_VERSION};

pub const PROVIDER_TYPE: &str = "openai-compatible";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Environment variable consulted when no `apiKey` is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const COMPLETIONS_ENDPOINT: &str = "/chat/completions";

fn config_manager() -> ConfigManager {
    presets::http().extend(
        ConfigSchema::new()
            .property(
                "baseUrl",
                PropertySchema::string()
                    .format(Format::Uri)
                    .default_value(DEFAULT_BASE_URL),
            )
            .property(
                "model",
                PropertySchema::string()
                    .min_length(1)
                    .default_value(DEFAULT_MODEL),
            )
            .property(
                "temperature",
                PropertySchema::number().range(Some(0.0), Some(2.0)),
            )
            .property("maxTokens", PropertySchema::integer().range(Some(1.0), None))
            .property("systemPrompt", PropertySchema::string())
            .property(
                "healthEndpoint",
                PropertySchema::string().default_value("/models"),
            ),
        ConfigMap::new(),
    )
}

/// Builds OpenAI-compatible providers.
#[derive(Clone)]
pub struct OpenAiCompatibleFactory {
    manager: Arc<ConfigManager>,
}

impl OpenAiCompatibleFactory {
    pub fn new() -> Self {
        Self {
            manager: Arc::new(config_manager()),
        }
    }
}

impl Default for OpenAiCompatibleFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory for OpenAiCompatibleFactory {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::new(PROVIDER_TYPE, "OpenAI-Compatible", BUILTIN_VERSION)
            .with_description("Chat completions over any OpenAI-compatible HTTP API")
            .with_features(["code-generation", "code-review", "chat"])
            .with_config_schema(self.manager.describe())
    }

    fn config_manager(&self) -> Option<Arc<ConfigManager>> {
        Some(self.manager.clone())
    }

    fn build(&self, mut config: ConfigMap) -> Result<SharedProvider, ProviderError> {
        if !config.contains_key("apiKey") {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.insert("apiKey".into(), Value::String(key));
            }
        }

        let strategy = HttpStrategy::new(HttpConfig::from_config(&config)?)?;
        let hooks = OpenAiHooks {
            model: config_str(&config, "model")
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            temperature: config.get("temperature").and_then(Value::as_f64),
            max_tokens: config.get("maxTokens").and_then(Value::as_u64),
            system_prompt: config_str(&config, "systemPrompt").map(str::to_string),
        };

        config.remove("apiKey");
        Ok(Arc::new(
            BaseProvider::new(
                PROVIDER_TYPE,
                "OpenAI-Compatible",
                Arc::new(strategy),
                Arc::new(JsonParser::new()),
                self.manager.clone(),
                hooks,
            )
            .with_config(config),
        ))
    }
}

/// Request and result shaping for `/chat/completions`.
pub struct OpenAiHooks {
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
    system_prompt: Option<String>,
}

impl ProviderHooks for OpenAiHooks {
    fn prepare_request(
        &self,
        options: &ExecutionOptions,
    ) -> Result<CommunicationRequest, ProviderError> {
        let scoped = options.scoped(PROVIDER_TYPE);

        let model = match scoped.get("model") {
            Some(Value::String(model)) => model.clone(),
            Some(_) => return Err(invalid_override(PROVIDER_TYPE, "model", "a string")),
            None => self.model.clone(),
        };

        let temperature = match scoped.get("temperature") {
            Some(value) => Some(
                value
                    .as_f64()
                    .filter(|t| (0.0..=2.0).contains(t))
                    .ok_or_else(|| {
                        invalid_override(PROVIDER_TYPE, "temperature", "a number in [0, 2]")
                    })?,
            ),
            None => options.temperature.or(self.temperature),
        };

        let max_tokens = match scoped.get("maxTokens") {
            Some(value) => Some(value.as_u64().filter(|n| *n >= 1).ok_or_else(|| {
                invalid_override(PROVIDER_TYPE, "maxTokens", "a positive integer")
            })?),
            None => options.max_tokens.or(self.max_tokens),
        };

        let mut messages = Vec::new();
        let system_prompt = match scoped.get("systemPrompt") {
            Some(Value::String(prompt)) => Some(prompt.clone()),
            Some(_) => return Err(invalid_override(PROVIDER_TYPE, "systemPrompt", "a string")),
            None => self.system_prompt.clone(),
        };
        if let Some(system) = system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": options.task }));

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(temperature) = temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        Ok(CommunicationRequest::http("POST", COMPLETIONS_ENDPOINT).with_body(body))
    }

    fn format_result(
        &self,
        parsed: Value,
        _response: &CommunicationResponse,
        duration_ms: u64,
    ) -> Result<ExecutionResult, ProviderError> {
        let content = parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::parsing(
                    codes::UNSUPPORTED_RESPONSE,
                    "Response has no choices[0].message.content",
                )
                .with_details(parsed.clone())
            })?;

        Ok(ExecutionResult::success(content, duration_ms).with_details(json!({
            "id": parsed.get("id"),
            "model": parsed.get("model"),
            "usage": parsed.get("usage"),
            "finishReason": parsed.pointer("/choices/0/finish_reason"),
        })))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            execution_modes: vec!["batch".into()],
            file_types: vec!["*".into()],
            supports_streaming: false,
            runs_locally: false,
            requires_internet: true,
            features: vec!["code-generation".into(), "code-review".into(), "chat".into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::http::tests::serve;

    fn hooks() -> OpenAiHooks {
        OpenAiHooks {
            model: "base-model".into(),
            temperature: Some(0.1),
            max_tokens: None,
            system_prompt: Some("be brief".into()),
        }
    }

    #[test]
    fn test_request_body() {
        let request = hooks()
            .prepare_request(&ExecutionOptions::new("write tests").with_max_tokens(64))
            .unwrap();
        assert_eq!(request.method.as_deref(), Some("POST"));
        assert_eq!(request.endpoint.as_deref(), Some("/chat/completions"));
        let body = request.body.unwrap();
        assert_eq!(body["model"], "base-model");
        assert_eq!(body["temperature"], 0.1);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "write tests");
    }

    #[test]
    fn test_precedence_scoped_options_config() {
        let options = ExecutionOptions::new("t")
            .with_temperature(0.5)
            .with_override(PROVIDER_TYPE, "model", "override-model");
        let body = hooks().prepare_request(&options).unwrap().body.unwrap();
        assert_eq!(body["model"], "override-model");
        assert_eq!(body["temperature"], 0.5);

        let options = options.with_override(PROVIDER_TYPE, "temperature", 1.5);
        let body = hooks().prepare_request(&options).unwrap().body.unwrap();
        assert_eq!(body["temperature"], 1.5);

        let bad = ExecutionOptions::new("t").with_override(PROVIDER_TYPE, "temperature", 3);
        assert!(hooks().prepare_request(&bad).is_err());
    }

    #[test]
    fn test_format_result_requires_content() {
        let err = hooks()
            .format_result(json!({"choices": []}), &CommunicationResponse::default(), 1)
            .unwrap_err();
        assert_eq!(err.code, codes::UNSUPPORTED_RESPONSE);
    }

    #[test]
    fn test_defaults() {
        let defaults = OpenAiCompatibleFactory::new()
            .config_manager()
            .unwrap()
            .defaults();
        assert_eq!(defaults["baseUrl"], DEFAULT_BASE_URL);
        assert_eq!(defaults["model"], DEFAULT_MODEL);
        assert_eq!(defaults["timeout"], 30_000);
    }

    #[tokio::test]
    async fn test_end_to_end_against_local_server() {
        let body = r#"{"id":"c1","model":"m","choices":[{"message":{"role":"assistant","content":"hello there"},"finish_reason":"stop"}],"usage":{"total_tokens":5}}"#;
        let (url, hits, captured) = serve(200, body, None).await;

        let config = json!({"baseUrl": url, "apiKey": "sk-test", "model": "m"});
        let provider = OpenAiCompatibleFactory::new()
            .create(config.as_object())
            .ok()
            .unwrap();

        let result = provider.execute(ExecutionOptions::new("say hi")).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, "hello there");
        assert_eq!(result.details.unwrap()["finishReason"], "stop");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);

        let raw = captured.lock().unwrap()[0].clone();
        assert!(raw.starts_with("POST /chat/completions"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(raw.contains("\"say hi\""));
    }

    #[tokio::test]
    async fn test_server_error_is_a_failed_result() {
        let (url, _hits, _captured) = serve(400, r#"{"error":"bad"}"#, None).await;
        let config = json!({"baseUrl": url, "retry": {"maxRetries": 0}});
        let provider = OpenAiCompatibleFactory::new()
            .create(config.as_object())
            .ok()
            .unwrap();

        let result = provider.execute(ExecutionOptions::new("x")).await;
        assert!(!result.success);
        assert_eq!(result.details.unwrap()["code"], codes::HTTP_ERROR);
    }
}
