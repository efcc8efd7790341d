// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP communication strategy.
//!
//! Builds the URL from `base_url + endpoint`, merges default, auth, and
//! per-request headers (request wins), and retries transient failures with
//! exponential backoff:
//!
//! ```text
//! delay = base_delay * multiplier^(attempt - 1), capped at max_delay
//! ```
//!
//! Timeouts and permanent network failures (connection refused, DNS) are
//! never retried. Exhausted or failed requests come back as an unsuccessful
//! [`CommunicationResponse`] with `status = 0` for network errors and
//! `status = 408` for timeouts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::error::{codes, ProviderError};
use crate::types::{CommunicationRequest, CommunicationResponse, ConfigMap};

use super::CommunicationStrategy;

/// Default request timeout.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Statuses retried by default.
const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Authentication applied to every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthConfig {
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
    Custom {
        headers: HashMap<String, String>,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

impl AuthConfig {
    /// Headers contributed by this auth scheme.
    pub fn headers(&self) -> Vec<(String, String)> {
        match self {
            Self::Bearer { token } => vec![("Authorization".into(), format!("Bearer {token}"))],
            Self::Basic { username, password } => {
                let encoded = BASE64.encode(format!("{username}:{password}"));
                vec![("Authorization".into(), format!("Basic {encoded}"))]
            }
            Self::ApiKey { key, header } => vec![(header.clone(), key.clone())],
            Self::Custom { headers } => headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Retry and backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

/// HTTP strategy configuration.
///
/// Deserializes from the HTTP preset keys (`baseUrl`, `apiKey`, `headers`,
/// `timeout`) plus optional `auth` and `retry` sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub base_url: String,

    /// Shortcut for bearer auth; ignored when `auth` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    #[serde(default = "default_headers")]
    pub headers: HashMap<String, String>,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Endpoint probed by `test_connection`.
    #[serde(default = "default_health_endpoint")]
    pub health_endpoint: String,
}

fn default_headers() -> HashMap<String, String> {
    HashMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Accept".to_string(), "application/json".to_string()),
    ])
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_health_endpoint() -> String {
    "/".to_string()
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            auth: None,
            headers: default_headers(),
            timeout: DEFAULT_TIMEOUT_MS,
            retry: RetryPolicy::default(),
            health_endpoint: default_health_endpoint(),
        }
    }

    /// Build from a provider configuration map. Configured `headers` are
    /// layered over the default JSON headers.
    pub fn from_config(config: &ConfigMap) -> Result<Self, ProviderError> {
        let mut parsed: Self = serde_json::from_value(Value::Object(config.clone())).map_err(|e| {
            ProviderError::configuration(codes::INVALID_CONFIG, format!("Invalid HTTP config: {e}"))
                .with_cause(e)
        })?;
        let configured = std::mem::replace(&mut parsed.headers, default_headers());
        for (name, value) in configured {
            parsed = parsed.with_header(name, value);
        }
        Ok(parsed)
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Set a header, replacing any existing one with the same name in any case.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Effective auth: explicit `auth`, else `api_key` as a bearer token.
    fn effective_auth(&self) -> Option<AuthConfig> {
        self.auth.clone().or_else(|| {
            self.api_key
                .as_ref()
                .map(|token| AuthConfig::Bearer { token: token.clone() })
        })
    }
}

/// Outcome of one attempt.
enum Attempt {
    Done(CommunicationResponse),
    Retry { reason: String, last: CommunicationResponse },
}

/// HTTP communication strategy.
pub struct HttpStrategy {
    client: Client,
    config: HttpConfig,
}

impl HttpStrategy {
    /// Create a strategy from configuration.
    pub fn new(config: HttpConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().build().map_err(|e| {
            ProviderError::configuration(
                codes::INVALID_CONFIG,
                format!("Failed to build HTTP client: {e}"),
            )
            .with_cause(e)
        })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Join `base_url` and `endpoint` with exactly one slash.
    pub fn build_url(&self, endpoint: Option<&str>) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match endpoint {
            None | Some("") => base.to_string(),
            Some(ep) if ep.starts_with("http://") || ep.starts_with("https://") => ep.to_string(),
            Some(ep) => format!("{}/{}", base, ep.trim_start_matches('/')),
        }
    }

    /// Merge default, auth, and request headers. Later sources win; names are
    /// compared case-insensitively and returned lowercased.
    pub fn build_headers(&self, request_headers: &HashMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for (name, value) in &self.config.headers {
            merged.insert(name.to_ascii_lowercase(), value.clone());
        }
        if let Some(auth) = self.config.effective_auth() {
            for (name, value) in auth.headers() {
                merged.insert(name.to_ascii_lowercase(), value);
            }
        }
        for (name, value) in request_headers {
            merged.insert(name.to_ascii_lowercase(), value.clone());
        }
        merged
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        headers: &BTreeMap<String, String>,
        request: &CommunicationRequest,
        timeout: Duration,
    ) -> Attempt {
        let started = Instant::now();
        let mut builder = self.client.request(method.clone(), url).timeout(timeout);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            None | Some(Value::Null) => builder,
            Some(Value::String(text)) => builder.body(text.clone()),
            Some(other) => builder.body(other.to_string()),
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Attempt::Done(network_failure(
                    408,
                    format!("Request timed out after {}ms", timeout.as_millis()),
                    json!({ "timedOut": true }),
                ));
            }
            Err(err) if is_permanent_network_error(&err) => {
                return Attempt::Done(network_failure(
                    0,
                    format!("Network error: {err}"),
                    json!({ "permanent": true }),
                ));
            }
            Err(err) => {
                let last = network_failure(0, format!("Request failed: {err}"), json!({}));
                return Attempt::Retry {
                    reason: err.to_string(),
                    last,
                };
            }
        };

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let is_json = headers
            .get("content-type")
            .is_some_and(|ct| ct.contains("json"));

        let text = match response.text().await {
            Ok(text) => text,
            Err(err) if err.is_timeout() || started.elapsed() >= timeout => {
                return Attempt::Done(network_failure(
                    408,
                    format!("Response body timed out after {}ms", timeout.as_millis()),
                    json!({ "timedOut": true, "status": status.as_u16() }),
                ));
            }
            Err(err) => {
                let last = network_failure(
                    0,
                    format!("Failed to read response body: {err}"),
                    json!({ "status": status.as_u16() }),
                );
                return Attempt::Retry {
                    reason: err.to_string(),
                    last,
                };
            }
        };

        let body = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        let success = status.is_success();
        let response = CommunicationResponse {
            status: i32::from(status.as_u16()),
            headers,
            body,
            error: (!success).then(|| {
                format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown Status")
                )
            }),
            success,
            duration: None,
            metadata: ConfigMap::new(),
        };

        if self.config.retry.is_retryable_status(status.as_u16()) {
            Attempt::Retry {
                reason: format!("status {}", status.as_u16()),
                last: response,
            }
        } else {
            Attempt::Done(response)
        }
    }
}

fn network_failure(status: i32, message: String, metadata: Value) -> CommunicationResponse {
    let metadata = match metadata {
        Value::Object(map) => map,
        _ => ConfigMap::new(),
    };
    CommunicationResponse {
        status,
        headers: HashMap::new(),
        body: Value::Null,
        error: Some(message),
        success: false,
        duration: None,
        metadata,
    }
}

/// Failures that will not go away by trying again.
fn is_permanent_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_builder() || err.is_redirect()
}

#[async_trait]
impl CommunicationStrategy for HttpStrategy {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(
        &self,
        request: CommunicationRequest,
    ) -> Result<CommunicationResponse, ProviderError> {
        let start = Instant::now();
        let url = self.build_url(request.endpoint.as_deref());
        let method_name = request
            .method
            .as_deref()
            .unwrap_or("POST")
            .to_ascii_uppercase();
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            ProviderError::validation(
                codes::INVALID_OPTION,
                format!("Invalid HTTP method: {method_name}"),
            )
        })?;
        let headers = self.build_headers(&request.headers);
        let timeout = Duration::from_millis(request.timeout.unwrap_or(self.config.timeout));
        let max_attempts = self.config.retry.max_retries.saturating_add(1);

        debug!(%url, method = %method, "Sending HTTP request");

        let mut attempt = 1;
        let (mut response, exhausted) = loop {
            match self.attempt(&method, &url, &headers, &request, timeout).await {
                Attempt::Done(response) => break (response, false),
                Attempt::Retry { last, .. } if attempt >= max_attempts => break (last, true),
                Attempt::Retry { reason, .. } => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        %url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Retrying HTTP request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        let duration = start.elapsed();
        response.duration = Some(duration.as_millis() as u64);
        response.metadata.insert("attempts".into(), json!(attempt));
        response.metadata.insert("url".into(), json!(url));
        response.metadata.insert("method".into(), json!(method.as_str()));
        response
            .metadata
            .insert("durationMs".into(), json!(duration.as_millis() as u64));
        if exhausted {
            response.success = false;
            response.metadata.insert("retriesExhausted".into(), json!(true));
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("http.execute", duration);

        Ok(response)
    }

    async fn test_connection(&self) -> bool {
        let url = self.build_url(Some(&self.config.health_endpoint));
        let headers = self.build_headers(&HashMap::new());
        let mut builder = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(self.config.timeout));
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match builder.send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(err) => {
                debug!(%url, error = %err, "HTTP connection test failed");
                false
            }
        }
    }
}
