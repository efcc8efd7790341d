// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Response parsers.
//!
//! A parser turns a [`CommunicationResponse`] body into structured JSON for a
//! provider's `format_result` hook. `can_handle` lets callers pick a parser
//! for a response they did not produce themselves.

mod stream;

pub use stream::StreamParser;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{codes, ProviderError};
use crate::types::CommunicationResponse;

/// Decodes a response body into structured data.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseParser: Send + Sync {
    /// Parser name, e.g. `"json"`.
    fn name(&self) -> &str;

    /// Decode the response body.
    async fn parse(&self, response: &CommunicationResponse) -> Result<Value, ProviderError>;

    /// Whether this parser understands the response.
    fn can_handle(&self, response: &CommunicationResponse) -> bool;
}

/// Shared parser handle.
pub type SharedParser = Arc<dyn ResponseParser>;

/// Content type of a response, lowercased, when the transport reported one.
pub(crate) fn content_type(response: &CommunicationResponse) -> Option<String> {
    response
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.to_ascii_lowercase())
}

/// Parses JSON bodies.
///
/// Objects and arrays pass through untouched; string bodies are decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl JsonParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseParser for JsonParser {
    fn name(&self) -> &str {
        "json"
    }

    async fn parse(&self, response: &CommunicationResponse) -> Result<Value, ProviderError> {
        match &response.body {
            Value::Object(_) | Value::Array(_) => Ok(response.body.clone()),
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(ProviderError::parsing(
                        codes::INVALID_JSON,
                        "Response body is empty",
                    ));
                }
                serde_json::from_str(trimmed).map_err(|e| {
                    ProviderError::parsing(codes::INVALID_JSON, format!("Invalid JSON response: {e}"))
                        .with_details(serde_json::json!({
                            "line": e.line(),
                            "column": e.column(),
                        }))
                        .with_cause(e)
                })
            }
            Value::Null => Err(ProviderError::parsing(
                codes::INVALID_JSON,
                "Response body is empty",
            )),
            other => Ok(other.clone()),
        }
    }

    fn can_handle(&self, response: &CommunicationResponse) -> bool {
        if let Some(ct) = content_type(response) {
            return ct.contains("json") && !ct.contains("ndjson");
        }
        match &response.body {
            Value::Object(_) | Value::Array(_) => true,
            Value::String(text) => {
                let trimmed = text.trim_start();
                trimmed.starts_with('{') || trimmed.starts_with('[')
            }
            _ => false,
        }
    }
}

/// Plain-text bodies, returned as a JSON string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl TextParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseParser for TextParser {
    fn name(&self) -> &str {
        "text"
    }

    async fn parse(&self, response: &CommunicationResponse) -> Result<Value, ProviderError> {
        Ok(match &response.body {
            Value::String(text) => Value::String(text.clone()),
            Value::Null => Value::String(String::new()),
            other => Value::String(other.to_string()),
        })
    }

    fn can_handle(&self, _response: &CommunicationResponse) -> bool {
        true
    }
}

/// Pick the first parser in `parsers` that can handle `response`.
pub fn select_parser<'a>(
    parsers: &'a [SharedParser],
    response: &CommunicationResponse,
) -> Option<&'a SharedParser> {
    parsers.iter().find(|p| p.can_handle(response))
}
