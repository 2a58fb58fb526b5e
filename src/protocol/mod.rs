// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Protocol codec.
//!
//! JSON-RPC 2.0 style envelopes exchanged with tool-servers:
//!
//! - [`codec`]: encode requests/notifications/responses, decode inbound frames
//! - [`ids`]: bridge-wide unique correlation ids
//! - [`methods`]: handshake and tool method names and payloads
//!
//! The codec never interprets tool semantics; arguments and results pass
//! through as opaque JSON.

pub mod codec;
pub mod error;
pub mod ids;
pub mod methods;

pub use codec::{
    decode, encode_notification, encode_request, encode_response, Incoming, Notification,
    Request, Response, RpcError, JSONRPC_VERSION,
};
pub use error::ProtocolError;
pub use ids::{CorrelationId, CorrelationIdGenerator};
