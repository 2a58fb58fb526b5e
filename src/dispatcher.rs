// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Call dispatcher.
//!
//! Routes one agent call: resolve the name, check the owning server's policy,
//! then hand the call to the owning connection and wait for exactly one of
//! response, deadline, or connection failure.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::aggregator::{CapabilityAggregator, Resolved};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::ProtocolError;
use crate::registry::ServerRegistry;
use crate::security::{SecurityValidator, Verdict};
use crate::telemetry::{CallSpan, Metrics};
use crate::types::ToolCallResult;

/// A successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub server_id: String,
    pub tool: String,
    pub data: Value,
    pub warnings: Vec<String>,
}

impl From<Dispatched> for ToolCallResult {
    fn from(d: Dispatched) -> Self {
        ToolCallResult::success(d.server_id, d.tool, d.data).with_warnings(d.warnings)
    }
}

pub struct CallDispatcher {
    registry: Arc<ServerRegistry>,
    aggregator: Arc<CapabilityAggregator>,
    validator: SecurityValidator,
    metrics: Arc<Metrics>,
}

impl CallDispatcher {
    pub fn new(registry: Arc<ServerRegistry>, aggregator: Arc<CapabilityAggregator>) -> Self {
        let metrics = Arc::clone(&registry.context().metrics);
        Self {
            registry,
            aggregator,
            validator: SecurityValidator::new(),
            metrics,
        }
    }

    /// Dispatch and fold any error into a [`ToolCallResult`].
    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> ToolCallResult {
        match self.dispatch(name, args, timeout).await {
            Ok(done) => done.into(),
            Err(e) => ToolCallResult::from(e),
        }
    }

    /// Dispatch one call. `timeout` defaults to the bridge's call timeout.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, args), fields(tool = %name)))]
    pub async fn dispatch(
        &self,
        name: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> BridgeResult<Dispatched> {
        let args = normalize_args(args)?;

        let Some(Resolved {
            server_id,
            definition,
            warnings,
        }) = self.aggregator.resolve(name)
        else {
            self.metrics.record_not_found();
            debug!(tool = %name, "Tool not resolvable");
            return Err(BridgeError::ToolNotFound(name.to_string()));
        };

        let (connection, policy) = self.registry.route(&server_id).ok_or_else(|| {
            self.metrics.record_not_found();
            BridgeError::ServerNotFound(server_id.clone())
        })?;
        let connection = connection.ok_or_else(|| {
            self.metrics.record_not_found();
            BridgeError::NotReady {
                server: server_id.clone(),
                state: crate::connection::ConnectionState::Disconnected,
            }
        })?;

        if let Verdict::Deny(reason) = self.validator.evaluate(&definition.name, &args, &policy) {
            self.metrics.record_policy_denial();
            warn!(server = %server_id, tool = %definition.name, reason = %reason, "Call denied by policy");
            return Err(BridgeError::policy(definition.qualified_name(), reason));
        }

        for warning in &warnings {
            info!(tool = %name, "{}", warning);
        }

        let timeout = timeout.unwrap_or_else(|| self.registry.context().settings.default_call_timeout());
        let span = CallSpan::start(Arc::clone(&self.metrics), &server_id, &definition.name);
        let outcome = connection.call_tool(&definition.name, &args, timeout).await;
        span.finish(outcome.as_ref().err().map(BridgeError::kind));

        let data = outcome?;
        Ok(Dispatched {
            server_id,
            tool: definition.name,
            data,
            warnings,
        })
    }
}

/// `null` becomes an empty object; any other non-object is rejected.
fn normalize_args(args: Value) -> BridgeResult<Value> {
    match args {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(args),
        other => Err(ProtocolError::Malformed(format!(
            "tool arguments must be a JSON object, got {}",
            kind_of(&other)
        ))
        .into()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
