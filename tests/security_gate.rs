// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The policy gate runs before anything reaches a transport.

mod common;

use serde_json::json;

use common::{echo_server, fast_settings, ready_bridge};
use toolbridge::{BridgeError, ErrorKind};

#[tokio::test]
async fn test_path_escape_never_reaches_transport() {
    let server = echo_server("fs", &["read_file"], &[]).with_allowed_path_prefixes(["/workspace"]);
    let bridge = ready_bridge(fast_settings(), vec![server]).await;
    let connection = bridge.registry().connection("fs").unwrap();
    let ids = &bridge.registry().context().ids;

    let frames_before = connection.stats().frames_sent;
    let issued_before = ids.issued();

    let err = bridge
        .dispatch("read_file", json!({"path": "../../etc/passwd"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::PolicyViolation { .. }), "{:?}", err);
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("/etc/passwd"));

    assert_eq!(connection.stats().frames_sent, frames_before);
    assert_eq!(ids.issued(), issued_before);
    assert_eq!(bridge.metrics().counters().policy_denials, 1);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_same_tool_in_and_out_of_prefix() {
    let server = echo_server("fs", &["read_file"], &[]).with_allowed_path_prefixes(["/workspace"]);
    let bridge = ready_bridge(fast_settings(), vec![server]).await;

    let inside = bridge
        .call_tool("read_file", json!({"path": "/workspace/notes.txt"}), None)
        .await;
    assert!(inside.is_ok(), "{:?}", inside);

    let outside = bridge
        .call_tool("read_file", json!({"path": "/workspace/../etc/hosts"}), None)
        .await;
    assert_eq!(outside.error_kind(), Some(ErrorKind::PolicyViolation));

    let serialized = serde_json::to_value(&outside).unwrap();
    assert_eq!(serialized["ok"], false);
    assert_eq!(serialized["errorKind"], "PolicyViolation");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_denied_command_wins() {
    let server = echo_server("shell", &["run"], &[])
        .with_allowed_commands(["*"])
        .with_denied_commands(["rm"]);
    let bridge = ready_bridge(fast_settings(), vec![server]).await;

    let allowed = bridge.call_tool("run", json!({"command": "ls -la"}), None).await;
    assert!(allowed.is_ok(), "{:?}", allowed);

    let denied = bridge
        .call_tool("run", json!({"command": "ls && rm -rf /"}), None)
        .await;
    assert_eq!(denied.error_kind(), Some(ErrorKind::PolicyViolation));

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_non_object_arguments_rejected() {
    let bridge = ready_bridge(fast_settings(), vec![echo_server("echo", &["echo"], &[])]).await;
    let result = bridge.call_tool("echo", json!(["a", "b"]), None).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Protocol));

    let null_args = bridge.call_tool("echo", serde_json::Value::Null, None).await;
    assert!(null_args.is_ok(), "{:?}", null_args);
    assert_eq!(null_args.data().unwrap()["arguments"], json!({}));
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_deny_list_sees_background_and_substitutions() {
    let server = echo_server("shell", &["run"], &[])
        .with_allowed_commands(["ls"])
        .with_denied_commands(["rm"]);
    let deny_only = echo_server("sh2", &["exec"], &[]).with_denied_commands(["rm"]);
    let bridge = ready_bridge(fast_settings(), vec![server, deny_only]).await;
    let connection = bridge.registry().connection("shell").unwrap();
    let frames_before = connection.stats().frames_sent;

    let background = bridge.call_tool("run", json!({"command": "ls & rm -rf /"}), None).await;
    assert_eq!(background.error_kind(), Some(ErrorKind::PolicyViolation));
    assert_eq!(connection.stats().frames_sent, frames_before);

    for command in ["ls $(rm -rf /)", "echo `rm -rf /`"] {
        let result = bridge.call_tool("exec", json!({"command": command}), None).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::PolicyViolation), "{}", command);
    }
    let harmless = bridge.call_tool("exec", json!({"command": "echo $(date)"}), None).await;
    assert!(harmless.is_ok(), "{:?}", harmless);

    bridge.shutdown().await;
}
