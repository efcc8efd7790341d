// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Communication strategies.
//!
//! A strategy executes a transport-agnostic [`CommunicationRequest`] and
//! returns a transport-agnostic [`CommunicationResponse`]:
//!
//! - [`HttpStrategy`] - HTTP APIs with auth, timeouts, and retry/backoff
//! - [`CliStrategy`] - CLI tools run as subprocesses with bounded output,
//!   timeouts, and signal handling
//!
//! Strategies are shared via `Arc` and may back several providers at once.
//! They hold no per-call mutable state.

pub mod cli;
pub mod http;

pub use cli::{CliConfig, CliStrategy};
pub use http::{AuthConfig, HttpConfig, HttpStrategy, RetryPolicy};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{CommunicationRequest, CommunicationResponse};

/// Transport abstraction used to reach a provider's backing implementation.
///
/// `execute` returns `Ok` for any response the backend produced, including
/// unsuccessful ones (`success == false`). `Err` is reserved for failures that
/// produced no response at all, such as an invalid request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommunicationStrategy: Send + Sync {
    /// Short transport name, e.g. `"http"` or `"cli"`.
    fn name(&self) -> &str;

    /// Execute a request.
    async fn execute(
        &self,
        request: CommunicationRequest,
    ) -> Result<CommunicationResponse, ProviderError>;

    /// Check whether the backend is reachable.
    async fn test_connection(&self) -> bool;
}

/// Shared strategy handle.
pub type SharedStrategy = Arc<dyn CommunicationStrategy>;
