// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The provider contract.
//!
//! A [`Provider`] is a pluggable execution backend. Callers hand it a task
//! via [`ExecutionOptions`] and always get an [`ExecutionResult`] back;
//! failures are reported in the result, never raised.
//!
//! Most providers are a [`BaseProvider`] wired with a communication
//! strategy, a response parser, a config manager, and a small
//! [`ProviderHooks`] implementation that shapes requests and results.

mod base;

pub use base::{validate_options, BaseProvider};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::types::{
    Capabilities, CommunicationRequest, CommunicationResponse, ConfigMap, ExecutionOptions,
    ExecutionResult,
};

/// Uniform execution contract implemented by every provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry type id, e.g. `"claude-code"`.
    fn provider_type(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Run a task. Never fails; errors are reported in the result.
    async fn execute(&self, options: ExecutionOptions) -> ExecutionResult;

    /// Check whether the backend is reachable. `false` on any error.
    async fn test_connection(&self) -> bool;

    /// Check a configuration map. `false` on any error.
    fn validate_config(&self, config: &ConfigMap) -> bool;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

/// Shared provider handle, as cached by the registry.
pub type SharedProvider = Arc<dyn Provider>;

/// Provider-specific steps of the execution pipeline.
pub trait ProviderHooks: Send + Sync {
    /// Build the transport request for validated options.
    fn prepare_request(
        &self,
        options: &ExecutionOptions,
    ) -> Result<CommunicationRequest, ProviderError>;

    /// Turn parsed response data into the final result.
    fn format_result(
        &self,
        parsed: Value,
        response: &CommunicationResponse,
        duration_ms: u64,
    ) -> Result<ExecutionResult, ProviderError>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}
