// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for provider executions, transport operations, and the
//! registry's instance cache.
//!
//! Nothing is exported; callers read a [`MetricsSnapshot`] and decide what to
//! do with it (the CLI prints one with `relay stats --metrics`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Provider executions by provider type.
    providers: RwLock<HashMap<String, ProviderMetrics>>,

    /// Transport operations (`http.execute`, `cli.execute`).
    operations: RwLock<HashMap<String, OperationMetrics>>,

    cache: CacheCounters,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            cache: CacheCounters::new(),
            start_time: Instant::now(),
        }
    }

    /// Record one `Provider::execute` call.
    pub fn record_execution(&self, provider_type: &str, duration: Duration, success: bool) {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        providers
            .entry(provider_type.to_string())
            .or_insert_with(ProviderMetrics::new)
            .record(duration, success);
    }

    /// Record a generic timed operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        ops.entry(name.to_string())
            .or_insert_with(OperationMetrics::new)
            .record(duration);
    }

    /// Record a registry cache lookup.
    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn provider_metrics(&self, provider_type: &str) -> Option<ProviderMetrics> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider_type)
            .cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// `(hits, misses)` for the registry cache.
    pub fn cache_counts(&self) -> (u64, u64) {
        (
            self.cache.hits.load(Ordering::Relaxed),
            self.cache.misses.load(Ordering::Relaxed),
        )
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (cache_hits, cache_misses) = self.cache_counts();
        MetricsSnapshot {
            providers: self
                .providers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            operations: self
                .operations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            cache_hits,
            cache_misses,
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.cache.hits.store(0, Ordering::Relaxed);
        self.cache.misses.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution counters for one provider type.
#[derive(Debug, Clone)]
pub struct ProviderMetrics {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self {
            executions: 0,
            successes: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
        }
    }

    pub fn record(&mut self, duration: Duration, success: bool) {
        self.executions += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.executions == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.executions as u32
        }
    }

    /// Fraction of successful executions; 1.0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            1.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing for a named operation.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram. Boundaries are in milliseconds.
#[derive(Debug, Clone)]
pub struct Histogram {
    bounds_ms: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn with_bounds(bounds_ms: Vec<u64>) -> Self {
        let counts = vec![0; bounds_ms.len() + 1];
        Self { bounds_ms, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let idx = self
            .bounds_ms
            .iter()
            .position(|&b| millis <= b)
            .unwrap_or(self.bounds_ms.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Upper bucket bound holding the `p`th percentile. The overflow bucket
    /// reports `Duration::MAX`.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }
        let target = ((total as f64 * p / 100.0).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self
                    .bounds_ms
                    .get(i)
                    .map_or(Duration::MAX, |&ms| Duration::from_millis(ms));
            }
        }
        Duration::MAX
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Provider calls range from local subprocesses to multi-minute agent runs.
        Self::with_bounds(vec![10, 100, 1_000, 10_000, 60_000, 600_000])
    }
}

#[derive(Debug)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheCounters {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

/// A point-in-time copy of all metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub providers: HashMap<String, ProviderMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Human-readable report, sorted by name.
    pub fn format_report(&self) -> String {
        let mut report = String::new();
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Cache: {} hits, {} misses\n",
            self.cache_hits, self.cache_misses
        ));

        if !self.providers.is_empty() {
            report.push_str("\nProviders:\n");
            let mut names: Vec<_> = self.providers.keys().collect();
            names.sort();
            for name in names {
                let m = &self.providers[name];
                report.push_str(&format!(
                    "  {}: {} runs, {:.1}% success, avg {:.2?}\n",
                    name,
                    m.executions,
                    m.success_rate() * 100.0,
                    m.avg_duration()
                ));
            }
        }

        if !self.operations.is_empty() {
            report.push_str("\nOperations:\n");
            let mut names: Vec<_> = self.operations.keys().collect();
            names.sort();
            for name in names {
                let m = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, max {:.2?}\n",
                    name,
                    m.count,
                    m.avg_duration(),
                    m.max_duration
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_metrics() {
        let mut metrics = ProviderMetrics::new();
        metrics.record(Duration::from_millis(100), true);
        metrics.record(Duration::from_millis(200), true);
        metrics.record(Duration::from_millis(60), false);

        assert_eq!(metrics.executions, 3);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.avg_duration(), Duration::from_millis(120));
        assert!((metrics.success_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_histogram_buckets() {
        let mut hist = Histogram::default();
        hist.record(Duration::from_millis(5));
        hist.record(Duration::from_millis(50));
        hist.record(Duration::from_secs(2));
        hist.record(Duration::from_secs(3600));

        assert_eq!(hist.counts(), &[1, 1, 0, 1, 0, 0, 1]);
        assert_eq!(hist.p50(), Duration::from_millis(100));
        assert_eq!(hist.p99(), Duration::MAX);
    }

    #[test]
    fn test_empty_histogram() {
        assert_eq!(Histogram::default().p50(), Duration::ZERO);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = Metrics::new();
        metrics.record_execution("shell", Duration::from_millis(3), true);
        metrics.record_operation("cli.execute", Duration::from_millis(2));
        metrics.record_cache(true);
        metrics.record_cache(false);
        metrics.record_cache(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.providers["shell"].executions, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
        let report = snapshot.format_report();
        assert!(report.contains("shell: 1 runs, 100.0% success"));
        assert!(report.contains("cli.execute: 1 ops"));

        metrics.reset();
        assert!(metrics.provider_metrics("shell").is_none());
        assert!(metrics.operation_metrics("cli.execute").is_none());
        assert_eq!(metrics.cache_counts(), (0, 0));
    }
}
