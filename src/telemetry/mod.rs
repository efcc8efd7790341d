// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and metrics.
//!
//! - **Tracing**: `tracing` events and spans, installed by [`init_telemetry`]
//! - **Metrics**: execution counters and latency histograms in [`GLOBAL_METRICS`]
//!
//! The library never installs a subscriber itself; the `relay` binary does so
//! at startup:
//!
//! ```rust,ignore
//! use relay::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Record paths, types, and counts in span fields; never API keys or task text.

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    Histogram, Metrics, MetricsSnapshot, OperationMetrics, ProviderMetrics, GLOBAL_METRICS,
};
