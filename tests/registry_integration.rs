// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests through the public API: registry, factories, base
//! provider pipeline, and both transports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use relay::error::{codes, ErrorKind, ProviderError, RegistryError};
use relay::factory::{ProviderFactory, SharedFactory, SimpleProviderFactory};
use relay::parser::TextParser;
use relay::provider::{BaseProvider, Provider, ProviderHooks, SharedProvider};
use relay::registry::{lazy_loader, ProviderRegistry, StaticModuleLoader};
use relay::schema::ConfigManager;
use relay::strategy::{
    AuthConfig, CliConfig, CliStrategy, CommunicationStrategy, HttpConfig, HttpStrategy,
    RetryPolicy,
};
use relay::types::{
    CommunicationRequest, CommunicationResponse, ConfigMap, ExecutionOptions, ExecutionResult,
    ProviderMetadata,
};

// ============================================================================
// Fixtures
// ============================================================================

struct FixedProvider {
    provider_type: String,
}

#[async_trait]
impl Provider for FixedProvider {
    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    fn name(&self) -> &str {
        "Fixed"
    }

    async fn execute(&self, _options: ExecutionOptions) -> ExecutionResult {
        ExecutionResult::success("fixed", 0)
    }

    async fn test_connection(&self) -> bool {
        true
    }

    fn validate_config(&self, _config: &ConfigMap) -> bool {
        true
    }
}

fn metadata(provider_type: &str) -> ProviderMetadata {
    ProviderMetadata::new(provider_type, provider_type.to_uppercase(), "1.0.0")
        .with_features(["code-generation"])
}

fn factory(provider_type: &str) -> SharedFactory {
    let owned = provider_type.to_string();
    Arc::new(SimpleProviderFactory::new(metadata(provider_type), move |_config| {
        Ok(Arc::new(FixedProvider {
            provider_type: owned.clone(),
        }) as SharedProvider)
    }))
}

fn config(value: Value) -> ConfigMap {
    value.as_object().cloned().unwrap()
}

/// Strategy that counts calls and returns a canned response.
struct CountingStrategy {
    calls: AtomicUsize,
}

#[async_trait]
impl CommunicationStrategy for CountingStrategy {
    fn name(&self) -> &str {
        "counting"
    }

    async fn execute(
        &self,
        _request: CommunicationRequest,
    ) -> Result<CommunicationResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CommunicationResponse {
            status: 0,
            body: json!("ok"),
            success: true,
            ..Default::default()
        })
    }

    async fn test_connection(&self) -> bool {
        true
    }
}

struct PassThrough;

impl ProviderHooks for PassThrough {
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
        Ok(ExecutionResult::success(
            parsed.as_str().unwrap_or_default(),
            duration_ms,
        ))
    }
}

/// One-shot HTTP/1.1 server replying `status` to every request.
async fn http_server(status: u16, body: &'static str) -> (String, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let captured = Arc::new(Mutex::new(Vec::new()));

    let hits_task = hits.clone();
    let captured_task = captured.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            hits_task.fetch_add(1, Ordering::SeqCst);
            let captured = captured_task.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                let mut raw = Vec::new();
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    raw.extend_from_slice(&buf[..n]);
                    if head_and_body_read(&raw) {
                        break;
                    }
                }
                captured
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&raw).into_owned());
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}"), hits, captured)
}

fn head_and_body_read(raw: &[u8]) -> bool {
    let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    raw.len() >= end + 4 + length
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_register_two_then_conflict() {
    let registry = ProviderRegistry::new();
    registry.register_provider(factory("alpha")).unwrap();
    registry.register_provider(factory("beta")).unwrap();
    assert_eq!(registry.available_providers().len(), 2);

    let err = registry.register_provider(factory("alpha")).unwrap_err();
    assert_eq!(err.code(), "PROVIDER_CONFLICT");
    assert!(err.to_string().contains("already registered"));
    assert_eq!(registry.provider_metadata("alpha"), Some(metadata("alpha")));
}

#[test]
fn test_registered_metadata_round_trips() {
    let registry = ProviderRegistry::new();
    for provider_type in ["a", "with-dash", "under_score", "Mixed9"] {
        registry.register_provider(factory(provider_type)).unwrap();
        assert!(registry.has_provider(provider_type));
        assert_eq!(
            registry.provider_metadata(provider_type),
            Some(metadata(provider_type))
        );
    }
}

#[test]
fn test_invalid_metadata_leaves_registry_unchanged() {
    let registry = ProviderRegistry::new();
    registry.register_provider(factory("ok")).unwrap();
    let before = registry.stats();

    for bad in ["", "has space", "dots.not.allowed", "slash/type"] {
        let bad_factory: SharedFactory = Arc::new(SimpleProviderFactory::new(
            ProviderMetadata::new(bad, "Bad", "1.0.0"),
            |_| Err(ProviderError::unknown("unreachable")),
        ));
        let err = registry.register_provider(bad_factory).unwrap_err();
        assert_eq!(err.code(), "INVALID_METADATA");
    }
    assert_eq!(registry.stats(), before);
    assert_eq!(registry.registered_providers(), vec!["ok".to_string()]);
}

#[test]
fn test_not_found_lists_available_types() {
    let registry = ProviderRegistry::new();
    registry.register_provider(factory("alpha")).unwrap();
    registry.register_provider(factory("beta")).unwrap();

    let err = registry.create_provider("unregistered", None).err().unwrap();
    assert!(matches!(err, RegistryError::NotFound { .. }));
    assert_eq!(err.code(), "PROVIDER_NOT_FOUND");
    assert_eq!(err.kind(), ErrorKind::Registry);
    assert_eq!(err.details()["availableTypes"], json!(["alpha", "beta"]));
}

#[test]
fn test_create_provider_is_referentially_stable() {
    let registry = ProviderRegistry::new();
    registry.register_provider(factory("alpha")).unwrap();

    let a = registry
        .create_provider("alpha", Some(&config(json!({"x": 1, "y": {"b": 2, "a": 1}}))))
        .unwrap();
    let b = registry
        .create_provider("alpha", Some(&config(json!({"y": {"a": 1, "b": 2}, "x": 1}))))
        .unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let c = registry
        .create_provider("alpha", Some(&config(json!({"x": 2}))))
        .unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(registry.stats().cached, 2);
}

#[tokio::test]
async fn test_lazy_loader_runs_once() {
    let registry = ProviderRegistry::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_loader = runs.clone();
    registry
        .register_lazy_provider(
            metadata("lazy"),
            lazy_loader(move || {
                runs_loader.fetch_add(1, Ordering::SeqCst);
                async { Ok(factory("lazy")) }
            }),
        )
        .unwrap();

    assert!(registry.has_provider("lazy"));
    assert!(matches!(
        registry.create_provider("lazy", None),
        Err(RegistryError::LazyNotLoaded { .. })
    ));

    for i in 0..3 {
        let cfg = config(json!({ "n": i }));
        registry.create_provider_async("lazy", Some(&cfg)).await.unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!registry.is_lazy("lazy"));
    assert!(registry.create_provider("lazy", None).is_ok());
}

#[test]
fn test_discovery_is_idempotent() {
    let registry = ProviderRegistry::new();
    let first = registry.discover_providers();
    assert!(!first.registered.is_empty());
    let after_first = registry.registered_providers();

    for _ in 0..4 {
        assert!(registry.discover_providers().is_empty());
    }
    assert_eq!(registry.registered_providers(), after_first);

    registry.clear();
    assert!(registry.registered_providers().is_empty());
    assert!(!registry.discover_providers().is_empty());
}

#[tokio::test]
async fn test_installed_external_package_is_discovered() {
    let loader = StaticModuleLoader::new().with_module("relay-provider-aider", || Ok(factory("aider")));
    let registry = ProviderRegistry::with_module_loader(Arc::new(loader));

    let report = registry.discover_providers();
    assert!(report.registered.contains(&"aider".to_string()));
    assert!(report.skipped.contains(&"codex".to_string()));
    assert!(report.failures.is_empty());

    let stats = registry.stats();
    assert_eq!(stats.external, 1);
    assert_eq!(stats.built_in, stats.total - 1);

    let provider = registry.create_provider_async("aider", None).await.unwrap();
    assert_eq!(provider.execute(ExecutionOptions::new("x")).await.output, "fixed");
}

#[tokio::test]
async fn test_default_registry_runs_shell_provider() {
    let registry = relay::create_default_registry();
    assert!(registry.has_provider("claude-code"));
    assert!(registry.has_provider("openai-compatible"));

    #[cfg(unix)]
    {
        let shell = registry.create_provider_async("shell", None).await.unwrap();
        let result = shell.execute(ExecutionOptions::new("printf relay")).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, "relay");
    }
}

#[tokio::test]
async fn test_creation_failure_is_wrapped() {
    let registry = ProviderRegistry::new();
    let err = registry
        .create_provider_async("shell", Some(&config(json!({"executable": ""}))))
        .await
        .err()
        .unwrap();
    // Not registered until discovery runs.
    assert_eq!(err.code(), "PROVIDER_NOT_FOUND");

    registry.discover_providers();
    let err = registry
        .create_provider_async("shell", Some(&config(json!({"executable": ""}))))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "PROVIDER_CREATION_FAILED");
    assert!(err.details()["cause"]["code"].is_string());
}

// ============================================================================
// Factory
// ============================================================================

#[test]
fn test_factory_rejects_mismatched_type() {
    let err = factory("alpha")
        .create(Some(&config(json!({"type": "beta"}))))
        .err()
        .unwrap();
    assert_eq!(err.code, codes::TYPE_MISMATCH);
    assert_eq!(err.kind, ErrorKind::Configuration);

    assert!(factory("alpha")
        .create(Some(&config(json!({"type": "alpha"}))))
        .is_ok());
}

// ============================================================================
// Base provider
// ============================================================================

#[tokio::test]
async fn test_blank_task_never_reaches_strategy() {
    let strategy = Arc::new(CountingStrategy {
        calls: AtomicUsize::new(0),
    });
    let provider = BaseProvider::new(
        "counting",
        "Counting",
        strategy.clone(),
        Arc::new(TextParser::new()),
        Arc::new(ConfigManager::default()),
        PassThrough,
    );

    for task in ["", "   ", "\n\t"] {
        let result = provider.execute(ExecutionOptions::new(task)).await;
        assert!(!result.success);
        assert_eq!(result.details.unwrap()["code"], codes::INVALID_TASK);
    }
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 0);

    let result = provider.execute(ExecutionOptions::new("go")).await;
    assert!(result.success);
    assert_eq!(result.output, "ok");
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Strategies
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_cli_echo() {
    let strategy = CliStrategy::new(CliConfig::new("echo").with_args(["hi"])).unwrap();
    let response = strategy.execute(CommunicationRequest::default()).await.unwrap();
    assert!(response.success);
    assert_eq!(response.status, 0);
    assert_eq!(response.body, json!("hi\n"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cli_overflow_truncates_and_signals() {
    let strategy = CliStrategy::new(
        CliConfig::new("sh")
            .with_args(["-c", "while true; do echo relay; done"])
            .with_max_buffer_size(1024),
    )
    .unwrap();
    let response = strategy.execute(CommunicationRequest::default()).await.unwrap();
    assert!(!response.success);
    assert!(response.body_text().unwrap().ends_with("[OUTPUT TRUNCATED]"));
    assert_eq!(response.metadata["signal"], "SIGTERM");
}

#[cfg(unix)]
#[tokio::test]
async fn test_cli_timeout() {
    let strategy =
        CliStrategy::new(CliConfig::new("sleep").with_args(["5"]).with_timeout(100)).unwrap();
    let response = strategy.execute(CommunicationRequest::default()).await.unwrap();
    assert!(!response.success);
    assert!(response.metadata_flag("timedOut"));
}

#[test]
fn test_http_bearer_header() {
    let strategy = HttpStrategy::new(
        HttpConfig::new("https://api.example.com").with_auth(AuthConfig::Bearer {
            token: "abc".into(),
        }),
    )
    .unwrap();
    let headers = strategy.build_headers(&Default::default());
    assert_eq!(headers.get("authorization").map(String::as_str), Some("Bearer abc"));
}

#[tokio::test]
async fn test_http_retries_then_fails_with_final_status() {
    let (url, hits, _) = http_server(503, r#"{"error":"busy"}"#).await;
    let strategy = HttpStrategy::new(HttpConfig::new(url).with_retry(RetryPolicy {
        max_retries: 2,
        base_delay_ms: 5,
        max_delay_ms: 10,
        ..Default::default()
    }))
    .unwrap();

    let response = strategy
        .execute(CommunicationRequest::http("GET", "/status"))
        .await
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.status, 503);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_openai_compatible_end_to_end() {
    let body = r#"{"id":"r1","choices":[{"message":{"content":"patched"},"finish_reason":"stop"}]}"#;
    let (url, _, captured) = http_server(200, body).await;

    let registry = relay::create_default_registry();
    let cfg = config(json!({"baseUrl": url, "apiKey": "k", "model": "local-model"}));
    let provider = registry
        .create_provider_async("openai-compatible", Some(&cfg))
        .await
        .unwrap();

    let options = ExecutionOptions::new("fix it").with_override("openai-compatible", "model", "other");
    let result = provider.execute(options).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, "patched");

    let raw = captured.lock().unwrap()[0].clone();
    assert!(raw.contains(r#""model":"other""#));
}
