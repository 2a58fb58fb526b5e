// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry, tracing, and metrics infrastructure.
//!
//! - **Tracing**: structured logging through `tracing`, installed once by
//!   the binary with [`init_telemetry`]. The library never installs a
//!   subscriber itself.
//! - **Metrics**: per-bridge counters and latency histograms ([`Metrics`]),
//!   fed by the dispatcher and the connection supervisors.
//!
//! # Usage
//!
//! ```rust,ignore
//! use toolbridge::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Log fields used across the crate: `server` (server id), `tool`, `id`
//! (correlation id), `state`. Tool arguments and results are never logged
//! above `trace`.

mod init;
pub mod metrics;
mod spans;

pub use init::{init_telemetry, LogStyle, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    CounterSnapshot, Histogram, Metrics, MetricsSnapshot, OperationMetrics, ToolMetrics,
};
pub use spans::CallSpan;
