// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streamed response parsing (server-sent events and JSON lines).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{codes, ProviderError};
use crate::types::CommunicationResponse;

use super::{content_type, ResponseParser};

const DONE_SENTINEL: &str = "[DONE]";

/// Parses streamed bodies into `{chunks: [...], text}`.
///
/// Accepts server-sent events (`data:` lines, `[DONE]` terminates) and
/// newline-delimited JSON. `text` concatenates string chunks and the
/// `content`/`text`/`delta` fields of object chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamParser;

impl StreamParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_sse(body: &str) -> Vec<Value> {
        let mut chunks = Vec::new();
        let mut data: Vec<&str> = Vec::new();

        let flush = |data: &mut Vec<&str>, chunks: &mut Vec<Value>| -> bool {
            if data.is_empty() {
                return false;
            }
            let payload = data.join("\n");
            data.clear();
            if payload.trim() == DONE_SENTINEL {
                return true;
            }
            chunks.push(serde_json::from_str(&payload).unwrap_or(Value::String(payload)));
            false
        };

        for line in body.lines() {
            if line.trim().is_empty() {
                if flush(&mut data, &mut chunks) {
                    return chunks;
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                data.push(rest.strip_prefix(' ').unwrap_or(rest));
            }
            // event:, id:, retry: and ":" comments carry no payload
        }
        flush(&mut data, &mut chunks);
        chunks
    }

    fn parse_json_lines(body: &str) -> Result<Vec<Value>, ProviderError> {
        body.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line.trim()).map_err(|e| {
                    ProviderError::parsing(
                        codes::INVALID_JSON,
                        format!("Invalid JSON on stream line {}: {e}", index + 1),
                    )
                    .with_details(json!({ "line": index + 1 }))
                    .with_cause(e)
                })
            })
            .collect()
    }

    fn is_sse(body: &str) -> bool {
        body.lines().any(|line| line.starts_with("data:"))
    }
}

/// Text carried by one chunk.
fn chunk_text(chunk: &Value) -> Option<String> {
    match chunk {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            for key in ["content", "text", "delta"] {
                match map.get(key) {
                    Some(Value::String(s)) => return Some(s.clone()),
                    Some(nested @ Value::Object(_)) => {
                        if let Some(text) = chunk_text(nested) {
                            return Some(text);
                        }
                    }
                    _ => {}
                }
            }
            // OpenAI-style: {"choices": [{"delta": {"content": "..."}}]}
            map.get("choices")
                .and_then(Value::as_array)
                .and_then(|choices| choices.first())
                .and_then(chunk_text)
        }
        _ => None,
    }
}

#[async_trait]
impl ResponseParser for StreamParser {
    fn name(&self) -> &str {
        "stream"
    }

    async fn parse(&self, response: &CommunicationResponse) -> Result<Value, ProviderError> {
        let chunks = match &response.body {
            Value::Array(items) => items.clone(),
            Value::String(body) if Self::is_sse(body) => Self::parse_sse(body),
            Value::String(body) => Self::parse_json_lines(body)?,
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        };
        let text: String = chunks.iter().filter_map(chunk_text).collect();
        Ok(json!({ "chunks": chunks, "text": text }))
    }

    fn can_handle(&self, response: &CommunicationResponse) -> bool {
        if let Some(ct) = content_type(response) {
            if ct.contains("event-stream") || ct.contains("ndjson") || ct.contains("jsonl") {
                return true;
            }
        }
        match &response.body {
            Value::String(body) if Self::is_sse(body) => true,
            Value::String(body) => {
                let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
                lines.len() > 1
                    && lines
                        .iter()
                        .all(|line| serde_json::from_str::<Value>(line.trim()).is_ok())
            }
            _ => false,
        }
    }
}
