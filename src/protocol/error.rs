// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Protocol-level errors.
//!
//! These never tear down a connection: the reader loop logs and drops the
//! offending frame.

use thiserror::Error;

/// Errors produced while encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame parsed as JSON but is not a valid envelope.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Frame is not valid JSON.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Response whose correlation id matches no pending request.
    #[error("unknown correlation id: {0}")]
    UnknownCorrelationId(String),

    /// A result payload did not have the shape the method requires.
    #[error("unexpected result for '{method}': {message}")]
    UnexpectedResult { method: String, message: String },
}

impl ProtocolError {
    /// Create an unexpected result error.
    pub fn unexpected(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedResult {
            method: method.into(),
            message: message.into(),
        }
    }
}
