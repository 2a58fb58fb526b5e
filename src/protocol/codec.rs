// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC 2.0 envelope encoding and decoding.
//!
//! Frames handed to and received from transports are single JSON objects
//! without trailing delimiters; framing is the transport's concern.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::ProtocolError;
use super::ids::CorrelationId;

/// Protocol version tag carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error object carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Reply for a server-initiated request the bridge does not handle.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }
}

/// An outbound or server-initiated request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: CorrelationId,
    pub method: String,
    pub params: Option<Value>,
}

/// A message that expects no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// A reply to an earlier request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: CorrelationId,
    pub outcome: Result<Value, RpcError>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response(Response),
    Notification(Notification),
    Request(Request),
}

impl Incoming {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Response(_) => "response",
            Self::Notification(_) => "notification",
            Self::Request(_) => "request",
        }
    }
}

#[derive(Serialize)]
struct Outgoing<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a CorrelationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RpcError>,
}

impl<'a> Outgoing<'a> {
    fn empty() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Distinguishes `"result": null` (a valid empty result) from an absent key.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Encode a request frame.
pub fn encode_request(
    id: &CorrelationId,
    method: &str,
    params: Option<&Value>,
) -> Result<Vec<u8>, ProtocolError> {
    let envelope = Outgoing {
        id: Some(id),
        method: Some(method),
        params,
        ..Outgoing::empty()
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Encode a notification frame.
pub fn encode_notification(method: &str, params: Option<&Value>) -> Result<Vec<u8>, ProtocolError> {
    let envelope = Outgoing {
        method: Some(method),
        params,
        ..Outgoing::empty()
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Encode a reply to a server-initiated request.
pub fn encode_response(
    id: &CorrelationId,
    outcome: &Result<Value, RpcError>,
) -> Result<Vec<u8>, ProtocolError> {
    let envelope = match outcome {
        Ok(result) => Outgoing {
            id: Some(id),
            result: Some(result),
            ..Outgoing::empty()
        },
        Err(error) => Outgoing {
            id: Some(id),
            error: Some(error),
            ..Outgoing::empty()
        },
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decode one inbound frame.
///
/// Batch arrays, non-object frames, frames with neither `id` nor `method`,
/// and responses carrying both or neither of `result`/`error` are rejected.
pub fn decode(frame: &[u8]) -> Result<Incoming, ProtocolError> {
    let value: Value = serde_json::from_slice(trim_ascii(frame))?;
    match &value {
        Value::Object(_) => {}
        Value::Array(_) => return Err(ProtocolError::Malformed("batch frames are not supported".into())),
        other => {
            return Err(ProtocolError::Malformed(format!(
                "expected a JSON object, got {}",
                json_type(other)
            )))
        }
    }

    let raw: RawEnvelope =
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if let Some(version) = raw.jsonrpc.as_deref() {
        if version != JSONRPC_VERSION {
            return Err(ProtocolError::Malformed(format!(
                "unsupported jsonrpc version '{}'",
                version
            )));
        }
    }

    let id = raw.id.map(id_from_value).transpose()?;

    match (id, raw.method) {
        (Some(id), Some(method)) => Ok(Incoming::Request(Request {
            id,
            method,
            params: raw.params,
        })),
        (None, Some(method)) => Ok(Incoming::Notification(Notification {
            method,
            params: raw.params,
        })),
        (Some(id), None) => {
            let outcome = match (raw.result, raw.error) {
                (Some(result), None) => Ok(result),
                (None, Some(error)) => Err(error),
                (Some(_), Some(_)) => {
                    return Err(ProtocolError::Malformed(format!(
                        "response {} carries both result and error",
                        id
                    )))
                }
                (None, None) => {
                    return Err(ProtocolError::Malformed(format!(
                        "response {} carries neither result nor error",
                        id
                    )))
                }
            };
            Ok(Incoming::Response(Response { id, outcome }))
        }
        (None, None) => Err(ProtocolError::Malformed(
            "frame has neither id nor method".into(),
        )),
    }
}

/// Servers may echo ids back as numbers; ids stay opaque strings on our side.
fn id_from_value(value: Value) -> Result<CorrelationId, ProtocolError> {
    match value {
        Value::String(s) => Ok(CorrelationId::new(s)),
        Value::Number(n) => Ok(CorrelationId::new(n.to_string())),
        other => Err(ProtocolError::Malformed(format!(
            "correlation id must be a string or number, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_encode_request_shape() {
        let id = CorrelationId::new("a1b2-7");
        let frame = encode_request(&id, "tools/call", Some(&json!({"name": "echo"}))).unwrap();
        assert_eq!(
            as_json(&frame),
            json!({"jsonrpc": "2.0", "id": "a1b2-7", "method": "tools/call", "params": {"name": "echo"}})
        );
    }

    #[test]
    fn test_encode_notification_omits_id_and_params() {
        let frame = encode_notification("notifications/initialized", None).unwrap();
        assert_eq!(
            as_json(&frame),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
        );
    }

    #[test]
    fn test_encode_error_response() {
        let id = CorrelationId::new("srv-1");
        let frame = encode_response(&id, &Err(RpcError::method_not_found("sampling/createMessage"))).unwrap();
        let value = as_json(&frame);
        assert_eq!(value["id"], "srv-1");
        assert_eq!(value["error"]["code"], -32601);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_decode_success_response() {
        let frame = br#"{"jsonrpc":"2.0","id":"x-1","result":{"tools":[]}}"#;
        match decode(frame).unwrap() {
            Incoming::Response(resp) => {
                assert_eq!(resp.id.as_str(), "x-1");
                assert_eq!(resp.outcome, Ok(json!({"tools": []})));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_null_result_is_success() {
        let frame = br#"{"jsonrpc":"2.0","id":"x-2","result":null}"#;
        match decode(frame).unwrap() {
            Incoming::Response(resp) => assert_eq!(resp.outcome, Ok(Value::Null)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_response() {
        let frame = br#"{"jsonrpc":"2.0","id":"x-3","error":{"code":-32000,"message":"boom","data":{"hint":1}}}"#;
        match decode(frame).unwrap() {
            Incoming::Response(resp) => {
                let err = resp.outcome.unwrap_err();
                assert_eq!(err.code, -32000);
                assert_eq!(err.message, "boom");
                assert_eq!(err.data, Some(json!({"hint": 1})));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_numeric_id_becomes_string() {
        let frame = br#"{"jsonrpc":"2.0","id":42,"result":{}}"#;
        match decode(frame).unwrap() {
            Incoming::Response(resp) => assert_eq!(resp.id.as_str(), "42"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification_and_server_request() {
        let note = decode(br#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#).unwrap();
        assert_eq!(note.kind(), "notification");

        let req = decode(br#"{"jsonrpc":"2.0","id":"s1","method":"ping"}"#).unwrap();
        match req {
            Incoming::Request(req) => {
                assert_eq!(req.method, "ping");
                assert!(req.params.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let frame = b"  {\"jsonrpc\":\"2.0\",\"id\":\"a\",\"result\":1}\r\n";
        assert!(matches!(decode(frame), Ok(Incoming::Response(_))));
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert!(matches!(decode(b"not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(decode(b"[]"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode(b"42"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode(br#"{"jsonrpc":"2.0"}"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            decode(br#"{"jsonrpc":"1.0","id":"a","result":1}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"jsonrpc":"2.0","id":"a"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"jsonrpc":"2.0","id":"a","result":1,"error":{"code":1,"message":"x"}}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"jsonrpc":"2.0","id":{"nested":true},"result":1}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_null_id_with_error_is_malformed() {
        // Error replies to unparseable requests carry id: null; nothing can be correlated.
        let frame = br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"parse"}}"#;
        assert!(matches!(decode(frame), Err(ProtocolError::Malformed(_))));
    }
}
