// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Template provider: a fixed pipeline over injected collaborators.
//!
//! `Validate -> PrepareRequest -> Communicate -> CheckSuccess -> Parse ->
//! FormatResult`. Every stage error, and any panic, becomes a failed
//! [`ExecutionResult`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;

use crate::error::{codes, ProviderError};
use crate::parser::SharedParser;
use crate::schema::ConfigManager;
use crate::strategy::SharedStrategy;
use crate::types::{
    Capabilities, CommunicationResponse, ConfigMap, ExecutionOptions, ExecutionResult,
};

use super::{Provider, ProviderHooks};

/// Check execution options before anything reaches the transport.
pub fn validate_options(options: &ExecutionOptions) -> Result<(), ProviderError> {
    if options.task.trim().is_empty() {
        return Err(ProviderError::validation(
            codes::INVALID_TASK,
            "Task must be a non-empty string",
        )
        .with_details(json!({ "field": "task" })));
    }
    if let Some(max_tokens) = options.max_tokens {
        if max_tokens < 1 {
            return Err(ProviderError::validation(
                codes::INVALID_OPTION,
                "maxTokens must be at least 1",
            )
            .with_details(json!({ "field": "maxTokens", "value": max_tokens })));
        }
    }
    if let Some(temperature) = options.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ProviderError::validation(
                codes::INVALID_OPTION,
                "temperature must be between 0 and 2",
            )
            .with_details(json!({ "field": "temperature", "value": temperature })));
        }
    }
    Ok(())
}

/// Error for a response the strategy marked unsuccessful.
fn response_failure(response: &CommunicationResponse) -> ProviderError {
    let code = if response.metadata_flag("timedOut") {
        codes::TIMEOUT
    } else if response.status == 0 {
        codes::REQUEST_FAILED
    } else if response.metadata.contains_key("exitCode") {
        codes::PROCESS_FAILED
    } else {
        codes::HTTP_ERROR
    };
    let message = response
        .error
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Request failed with status {}", response.status));

    ProviderError::communication(code, message).with_details(json!({
        "status": response.status,
        "body": response.body,
        "metadata": response.metadata,
    }))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Provider built from a strategy, a parser, a config manager, and hooks.
pub struct BaseProvider<H: ProviderHooks> {
    provider_type: String,
    name: String,
    config: ConfigMap,
    strategy: SharedStrategy,
    parser: SharedParser,
    config_manager: Arc<ConfigManager>,
    hooks: H,
}

impl<H: ProviderHooks> BaseProvider<H> {
    pub fn new(
        provider_type: impl Into<String>,
        name: impl Into<String>,
        strategy: SharedStrategy,
        parser: SharedParser,
        config_manager: Arc<ConfigManager>,
        hooks: H,
    ) -> Self {
        Self {
            provider_type: provider_type.into(),
            name: name.into(),
            config: ConfigMap::new(),
            strategy,
            parser,
            config_manager,
            hooks,
        }
    }

    /// Attach the resolved configuration this instance was built from.
    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn strategy(&self) -> &SharedStrategy {
        &self.strategy
    }

    pub fn parser(&self) -> &SharedParser {
        &self.parser
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    async fn run_pipeline(
        &self,
        options: &ExecutionOptions,
        start: Instant,
    ) -> Result<ExecutionResult, ProviderError> {
        validate_options(options)?;

        let request = self.hooks.prepare_request(options)?;
        let response = self.strategy.execute(request).await?;
        if !response.success {
            return Err(response_failure(&response));
        }

        let parsed = self.parser.parse(&response).await?;
        let duration_ms = start.elapsed().as_millis() as u64;
        self.hooks.format_result(parsed, &response, duration_ms)
    }
}

#[async_trait]
impl<H: ProviderHooks> Provider for BaseProvider<H> {
    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, options: ExecutionOptions) -> ExecutionResult {
        let execution_id = Uuid::new_v4();
        let span = info_span!(
            "provider_execute",
            provider = %self.provider_type,
            execution_id = %execution_id,
        );
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.run_pipeline(&options, start))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                span.in_scope(|| {
                    debug!(kind = %err.kind, code = %err.code, error = %err.message, "Execution failed")
                });
                ExecutionResult::failure(err.message.clone(), duration_ms)
                    .with_details(err.to_json())
            }
            Err(payload) => {
                let err = ProviderError::unknown(format!(
                    "Provider panicked: {}",
                    panic_message(payload.as_ref())
                ));
                span.in_scope(|| debug!(error = %err.message, "Execution panicked"));
                ExecutionResult::failure(err.message.clone(), duration_ms)
                    .with_details(err.to_json())
            }
        };

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_execution(
            &self.provider_type,
            start.elapsed(),
            result.success,
        );

        result
    }

    async fn test_connection(&self) -> bool {
        AssertUnwindSafe(self.strategy.test_connection())
            .catch_unwind()
            .await
            .unwrap_or(false)
    }

    fn validate_config(&self, config: &ConfigMap) -> bool {
        std::panic::catch_unwind(AssertUnwindSafe(|| self.config_manager.validate(config)))
            .unwrap_or(false)
    }

    fn capabilities(&self) -> Capabilities {
        self.hooks.capabilities()
    }
}

/// Output text from parsed data: a string, or one of the common text fields.
pub(crate) fn output_text(parsed: &Value, fields: &[&str]) -> Option<String> {
    if let Value::String(text) = parsed {
        return Some(text.clone());
    }
    fields
        .iter()
        .find_map(|field| parsed.pointer(field).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::parser::{JsonParser, MockResponseParser};
    use crate::strategy::MockCommunicationStrategy;
    use crate::types::CommunicationRequest;

    struct EchoHooks;

    impl ProviderHooks for EchoHooks {
        fn prepare_request(
            &self,
            options: &ExecutionOptions,
        ) -> Result<CommunicationRequest, ProviderError> {
            Ok(CommunicationRequest::cli([options.task.clone()]))
        }

        fn format_result(
            &self,
            parsed: Value,
            _response: &CommunicationResponse,
            duration_ms: u64,
        ) -> Result<ExecutionResult, ProviderError> {
            let output = output_text(&parsed, &["/result"]).ok_or_else(|| {
                ProviderError::parsing(codes::UNSUPPORTED_RESPONSE, "missing result")
            })?;
            Ok(ExecutionResult::success(output, duration_ms))
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                execution_modes: vec!["batch".into()],
                runs_locally: true,
                ..Default::default()
            }
        }
    }

    struct PanickingHooks;

    impl ProviderHooks for PanickingHooks {
        fn prepare_request(
            &self,
            _options: &ExecutionOptions,
        ) -> Result<CommunicationRequest, ProviderError> {
            panic!("hook exploded");
        }

        fn format_result(
            &self,
            _parsed: Value,
            _response: &CommunicationResponse,
            duration_ms: u64,
        ) -> Result<ExecutionResult, ProviderError> {
            Ok(ExecutionResult::success("", duration_ms))
        }
    }

    fn ok_response(body: Value) -> CommunicationResponse {
        CommunicationResponse {
            status: 0,
            body,
            success: true,
            ..Default::default()
        }
    }

    fn provider<H: ProviderHooks>(strategy: MockCommunicationStrategy, hooks: H) -> BaseProvider<H> {
        BaseProvider::new(
            "echo",
            "Echo",
            Arc::new(strategy),
            Arc::new(JsonParser::new()),
            Arc::new(crate::schema::presets::cli()),
            hooks,
        )
    }

    #[tokio::test]
    async fn test_empty_task_never_reaches_strategy() {
        for task in ["", "   \n\t"] {
            let mut strategy = MockCommunicationStrategy::new();
            strategy.expect_execute().times(0);
            let provider = provider(strategy, EchoHooks);

            let result = provider.execute(ExecutionOptions::new(task)).await;
            assert!(!result.success);
            let details = result.details.unwrap();
            assert_eq!(details["kind"], "validation");
            assert_eq!(details["code"], codes::INVALID_TASK);
        }
    }

    #[tokio::test]
    async fn test_option_bounds() {
        let mut strategy = MockCommunicationStrategy::new();
        strategy.expect_execute().times(0);
        let provider = provider(strategy, EchoHooks);

        for options in [
            ExecutionOptions::new("t").with_temperature(2.5),
            ExecutionOptions::new("t").with_temperature(-0.1),
            ExecutionOptions::new("t").with_max_tokens(0),
        ] {
            let result = provider.execute(options).await;
            assert!(!result.success);
            assert_eq!(result.details.unwrap()["code"], codes::INVALID_OPTION);
        }

        assert!(validate_options(&ExecutionOptions::new("t").with_temperature(2.0)).is_ok());
        assert!(validate_options(&ExecutionOptions::new("t").with_max_tokens(1)).is_ok());
    }

    #[tokio::test]
    async fn test_successful_pipeline() {
        let mut strategy = MockCommunicationStrategy::new();
        strategy
            .expect_execute()
            .withf(|request| request.args == vec!["do it".to_string()])
            .times(1)
            .returning(|_| Ok(ok_response(json!("{\"result\": \"done\"}"))));
        let provider = provider(strategy, EchoHooks);

        let result = provider.execute(ExecutionOptions::new("do it")).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, "done");
    }

    #[tokio::test]
    async fn test_unsuccessful_response_becomes_failure() {
        let mut strategy = MockCommunicationStrategy::new();
        strategy.expect_execute().times(1).returning(|_| {
            let mut response = CommunicationResponse {
                status: 2,
                body: json!(""),
                error: Some("boom\n".into()),
                success: false,
                ..Default::default()
            };
            response.metadata.insert("exitCode".into(), json!(2));
            Ok(response)
        });
        let provider = provider(strategy, EchoHooks);

        let result = provider.execute(ExecutionOptions::new("x")).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
        let details = result.details.unwrap();
        assert_eq!(details["code"], codes::PROCESS_FAILED);
        assert_eq!(details["details"]["status"], 2);
    }

    #[tokio::test]
    async fn test_timed_out_response_code() {
        let mut strategy = MockCommunicationStrategy::new();
        strategy.expect_execute().returning(|_| {
            let mut response = CommunicationResponse {
                status: 143,
                body: json!(""),
                success: false,
                ..Default::default()
            };
            response.metadata.insert("timedOut".into(), json!(true));
            Ok(response)
        });
        let provider = provider(strategy, EchoHooks);
        let result = provider.execute(ExecutionOptions::new("x")).await;
        assert_eq!(result.details.unwrap()["code"], codes::TIMEOUT);
        assert_eq!(result.error.as_deref(), Some("Request failed with status 143"));
    }

    #[tokio::test]
    async fn test_strategy_error_is_reported() {
        let mut strategy = MockCommunicationStrategy::new();
        strategy.expect_execute().returning(|_| {
            Err(ProviderError::communication(codes::SPAWN_FAILED, "no such file"))
        });
        let provider = provider(strategy, EchoHooks);
        let result = provider.execute(ExecutionOptions::new("x")).await;
        assert!(!result.success);
        assert_eq!(result.details.unwrap()["code"], codes::SPAWN_FAILED);
    }

    #[tokio::test]
    async fn test_parse_error_is_reported() {
        let mut strategy = MockCommunicationStrategy::new();
        strategy
            .expect_execute()
            .returning(|_| Ok(ok_response(json!("not json"))));
        let provider = provider(strategy, EchoHooks);
        let result = provider.execute(ExecutionOptions::new("x")).await;
        assert!(!result.success);
        assert_eq!(result.details.unwrap()["kind"], "parsing");
    }

    #[tokio::test]
    async fn test_mock_parser_output_reaches_hooks() {
        let mut strategy = MockCommunicationStrategy::new();
        strategy
            .expect_execute()
            .returning(|_| Ok(ok_response(json!("raw"))));
        let mut parser = MockResponseParser::new();
        parser
            .expect_parse()
            .times(1)
            .returning(|_| Ok(json!({"result": "from parser"})));

        let provider = BaseProvider::new(
            "echo",
            "Echo",
            Arc::new(strategy),
            Arc::new(parser),
            Arc::new(ConfigManager::default()),
            EchoHooks,
        );
        let result = provider.execute(ExecutionOptions::new("x")).await;
        assert_eq!(result.output, "from parser");
    }

    #[tokio::test]
    async fn test_panic_in_hook_is_contained() {
        let mut strategy = MockCommunicationStrategy::new();
        strategy.expect_execute().times(0);
        let provider = provider(strategy, PanickingHooks);

        let result = provider.execute(ExecutionOptions::new("x")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("hook exploded"));
        let details = result.details.unwrap();
        assert_eq!(details["kind"], ErrorKind::Provider.as_str());
        assert_eq!(details["code"], codes::UNKNOWN_ERROR);
    }

    #[tokio::test]
    async fn test_connection_and_config_delegate() {
        let mut strategy = MockCommunicationStrategy::new();
        strategy.expect_test_connection().times(1).returning(|| true);
        let provider = provider(strategy, EchoHooks);

        assert!(provider.test_connection().await);
        assert!(provider.validate_config(
            json!({"executable": "echo"}).as_object().unwrap()
        ));
        assert!(!provider.validate_config(&ConfigMap::new()));
        assert!(provider.capabilities().runs_locally);
        assert_eq!(provider.provider_type(), "echo");
        assert_eq!(provider.name(), "Echo");
    }

    #[test]
    fn test_output_text() {
        assert_eq!(output_text(&json!("x"), &[]), Some("x".into()));
        assert_eq!(
            output_text(&json!({"choices": [{"message": {"content": "y"}}]}), &[
                "/result",
                "/choices/0/message/content"
            ]),
            Some("y".into())
        );
        assert_eq!(output_text(&json!({"other": 1}), &["/result"]), None);
    }
}
