// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for consistent instrumentation.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info_span, Span};

use super::metrics::Metrics;
use crate::error::ErrorKind;

/// RAII guard for timing one dispatched tool call.
///
/// Records duration and outcome to the bridge's metrics.
pub struct CallSpan {
    key: String,
    start: Instant,
    span: Span,
    metrics: Arc<Metrics>,
}

impl CallSpan {
    /// Start a span for a call resolved to `server_id`/`tool`.
    pub fn start(metrics: Arc<Metrics>, server_id: &str, tool: &str) -> Self {
        let span = info_span!(
            "tool_call",
            server = %server_id,
            tool = %tool,
            duration_ms = tracing::field::Empty,
            success = tracing::field::Empty,
            error_kind = tracing::field::Empty,
        );

        Self {
            key: crate::types::qualify(server_id, tool),
            start: Instant::now(),
            span,
            metrics,
        }
    }

    /// Get the underlying tracing span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Finish the span, recording duration and outcome.
    pub fn finish(self, failure: Option<ErrorKind>) {
        let duration = self.start.elapsed();

        self.span.record("duration_ms", duration.as_secs_f64() * 1000.0);
        self.span.record("success", failure.is_none());
        if let Some(kind) = failure {
            self.span.record("error_kind", tracing::field::display(kind));
        }

        self.metrics.record_call(&self.key, duration, failure);

        tracing::debug!(parent: &self.span, "Tool call complete");
    }
}
