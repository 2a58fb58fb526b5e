// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for performance monitoring.
//!
//! Provides lightweight metrics collection without external dependencies.
//! One [`Metrics`] instance belongs to one bridge; there is no global.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::ErrorKind;

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Call metrics by resolved tool (`serverId.toolName`).
    tools: RwLock<HashMap<String, ToolMetrics>>,

    /// Timing for connection-level operations (handshake, tool refresh).
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Bridge-wide counters.
    counters: BridgeCounters,

    /// Start time for calculating uptime.
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            counters: BridgeCounters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record a tool call that reached a tool-server.
    pub fn record_call(&self, name: &str, duration: Duration, failure: Option<ErrorKind>) {
        let mut tools = self.tools.write();
        let metrics = tools.entry(name.to_string()).or_default();
        metrics.record(duration, failure.is_none());
        if failure == Some(ErrorKind::Timeout) {
            metrics.timeouts += 1;
            self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a generic operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write();
        let metrics = ops.entry(name.to_string()).or_default();
        metrics.record(duration);
    }

    /// A call the security validator refused.
    pub fn record_policy_denial(&self) {
        self.counters.policy_denials.fetch_add(1, Ordering::Relaxed);
    }

    /// A call that could not be routed (unknown tool, owner not ready).
    pub fn record_not_found(&self) {
        self.counters.not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// An inbound frame that was malformed or matched no pending request.
    pub fn record_dropped_frame(&self) {
        self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// A reconnect attempt was scheduled.
    pub fn record_reconnect(&self) {
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// A transport failure tore down a live connection.
    pub fn record_transport_failure(&self) {
        self.counters.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get metrics for a specific tool.
    pub fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        self.tools.read().get(name).cloned()
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations.read().get(name).cloned()
    }

    /// Current counter values.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tools: self.tools.read().clone(),
            operations: self.operations.read().clone(),
            counters: self.counters.snapshot(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.tools.write().clear();
        self.operations.write().clear();
        self.counters.reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for a specific tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetrics {
    /// Total number of invocations.
    pub invocations: u64,

    /// Number of successful invocations.
    pub successes: u64,

    /// Number of failed invocations.
    pub failures: u64,

    /// Failures that were deadline expiries.
    pub timeouts: u64,

    /// Total time spent in this tool.
    pub total_duration: Duration,

    /// Minimum execution time.
    pub min_duration: Duration,

    /// Maximum execution time.
    pub max_duration: Duration,

    /// Latency distribution.
    #[serde(skip)]
    pub histogram: Histogram,
}

impl ToolMetrics {
    /// Create new empty tool metrics.
    pub fn new() -> Self {
        Self {
            invocations: 0,
            successes: 0,
            failures: 0,
            timeouts: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    /// Record a tool execution.
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    /// Calculate average execution time.
    pub fn avg_duration(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.invocations as u32
        }
    }

    /// Calculate success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            1.0
        } else {
            self.successes as f64 / self.invocations as f64
        }
    }
}

impl Default for ToolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Generic operation metrics with histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
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

/// Simple histogram with fixed buckets for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket boundaries in microseconds.
    buckets: Vec<u64>,

    /// Count per bucket, plus one overflow bucket.
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    /// Record a duration value.
    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Calculate approximate percentile (p50, p90, p99, etc.).
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let micros = if i < self.buckets.len() {
                    self.buckets[i]
                } else {
                    self.buckets.last().copied().unwrap_or(0) * 10
                };
                return Duration::from_micros(micros);
            }
        }

        Duration::ZERO
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
        // 1ms, 10ms, 50ms, 100ms, 500ms, 1s, 5s, 30s
        Self::with_buckets(vec![
            1_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000, 30_000_000,
        ])
    }
}

/// Thread-safe bridge counters.
#[derive(Debug, Default)]
struct BridgeCounters {
    policy_denials: AtomicU64,
    not_found: AtomicU64,
    timeouts: AtomicU64,
    dropped_frames: AtomicU64,
    reconnects: AtomicU64,
    transport_failures: AtomicU64,
}

impl BridgeCounters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            policy_denials: self.policy_denials.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.policy_denials,
            &self.not_found,
            &self.timeouts,
            &self.dropped_frames,
            &self.reconnects,
            &self.transport_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub policy_denials: u64,
    pub not_found: u64,
    pub timeouts: u64,
    pub dropped_frames: u64,
    pub reconnects: u64,
    pub transport_failures: u64,
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tools: HashMap<String, ToolMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub counters: CounterSnapshot,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Bridge Metrics ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        let c = &self.counters;
        report.push_str(&format!(
            "Denied: {}  Not found: {}  Timeouts: {}  Dropped frames: {}  Reconnects: {}  Transport failures: {}\n\n",
            c.policy_denials, c.not_found, c.timeouts, c.dropped_frames, c.reconnects, c.transport_failures
        ));

        if !self.tools.is_empty() {
            report.push_str("Tool Metrics:\n");
            let mut names: Vec<_> = self.tools.keys().collect();
            names.sort();
            for name in names {
                let metrics = &self.tools[name];
                report.push_str(&format!(
                    "  {}: {} calls, {:.1}% success, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.invocations,
                    metrics.success_rate() * 100.0,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
            report.push('\n');
        }

        if !self.operations.is_empty() {
            report.push_str("Operation Metrics:\n");
            let mut names: Vec<_> = self.operations.keys().collect();
            names.sort();
            for name in names {
                let metrics = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                ));
            }
        }

        report
    }
}
