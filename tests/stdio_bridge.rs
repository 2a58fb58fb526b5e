// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests against the `echo-tool` stdio server.

mod common;

use std::time::{Duration, Instant};

use serde_json::json;

use common::{collect_states, echo_server, fast_settings, ready_bridge, PATIENCE};
use toolbridge::config::StdioFraming;
use toolbridge::{BridgeError, ConnectionState, ErrorKind, ToolCallResult};

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_lists_advertised_tool_after_enable() {
    let bridge = ready_bridge(fast_settings(), vec![echo_server("echo", &["echo"], &[])]).await;

    let snapshot = bridge.list_tools();
    assert_eq!(snapshot.names(), vec!["echo"]);
    assert!(!snapshot.has_warnings());
    let tool = snapshot.get("echo").unwrap();
    assert_eq!(tool.server_id, "echo");
    assert_eq!(tool.qualified_name, "echo.echo");
    assert_eq!(tool.schema["type"], "object");

    let health = bridge.health();
    assert_eq!(health.len(), 1);
    assert_eq!(health[0].state, ConnectionState::Ready);
    assert_eq!(health[0].tool_count, 1);
    assert!(health[0].last_ready_at.is_some());

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_call_round_trip() {
    let bridge = ready_bridge(fast_settings(), vec![echo_server("echo", &["echo"], &[])]).await;

    let result = bridge.call_tool("echo", json!({"message": "hi"}), None).await;
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(result.data().unwrap()["arguments"]["message"], "hi");

    let serialized = serde_json::to_value(&result).unwrap();
    assert_eq!(serialized["ok"], true);

    let metrics = bridge.metrics().tool_metrics("echo.echo").unwrap();
    assert_eq!(metrics.invocations, 1);
    assert_eq!(metrics.successes, 1);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_paginated_tool_list() {
    let bridge = ready_bridge(
        fast_settings(),
        vec![echo_server("paged", &["a", "b", "c"], &["--page-size", "1"])],
    )
    .await;
    assert_eq!(bridge.list_tools().names(), vec!["a", "b", "c"]);
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_content_length_framing() {
    let server = echo_server("framed", &["echo"], &["--framing", "content-length"])
        .with_framing(StdioFraming::ContentLength);
    let bridge = ready_bridge(fast_settings(), vec![server]).await;

    let result = bridge.call_tool("echo", json!({"n": 1}), None).await;
    assert!(result.is_ok(), "{:?}", result);
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_allowed_tools_filter_advertisement() {
    let server = echo_server("fs", &["read_file", "delete_all"], &[]).with_allowed_tools(["read_file"]);
    let bridge = ready_bridge(fast_settings(), vec![server]).await;
    assert_eq!(bridge.list_tools().names(), vec!["read_file"]);

    let result = bridge.call_tool("delete_all", json!({}), None).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::NotFound));
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_list_changed_refreshes_tools() {
    let bridge = ready_bridge(
        fast_settings(),
        vec![echo_server("grow", &["echo", "add_tool"], &[])],
    )
    .await;
    let mut changes = bridge.tool_changes();

    let result = bridge.call_tool("add_tool", json!({"name": "late"}), None).await;
    assert!(result.is_ok(), "{:?}", result);

    let changed = tokio::time::timeout(PATIENCE, changes.changed()).await.unwrap();
    assert!(changed);

    let deadline = Instant::now() + PATIENCE;
    while !bridge.list_tools().names().contains(&"late") {
        assert!(Instant::now() < deadline, "refreshed tool never appeared");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(bridge.metrics().operation_metrics("tool_refresh").is_some());
    bridge.shutdown().await;
}

// ============================================================================
// Deadlines and ordering
// ============================================================================

#[tokio::test]
async fn test_timeout_then_late_response_dropped() {
    let bridge = ready_bridge(
        fast_settings(),
        vec![echo_server("slow", &["echo"], &["--delay-ms", "500"])],
    )
    .await;

    let started = Instant::now();
    let err = bridge
        .dispatch("echo", json!({"step": 1}), Some(50))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, BridgeError::Timeout { timeout_ms: 50, .. }), "{:?}", err);
    assert!(err.is_retryable());
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);

    // The late reply arrives at ~500ms and is dropped without side effects.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let connection = bridge.registry().connection("slow").unwrap();
    assert_eq!(connection.state(), ConnectionState::Ready);
    assert_eq!(connection.stats().in_flight, 0);
    assert_eq!(bridge.metrics().counters().dropped_frames, 1);
    assert_eq!(bridge.metrics().counters().timeouts, 1);

    let result = bridge.call_tool("echo", json!({"delayMs": 0}), Some(2_000)).await;
    assert!(result.is_ok(), "{:?}", result);
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_calls_out_of_order() {
    let bridge = ready_bridge(fast_settings(), vec![echo_server("echo", &["echo"], &[])]).await;

    let calls = (0..8u64).map(|i| {
        let bridge = &bridge;
        async move {
            // Earlier calls answer later.
            let args = json!({"index": i, "delayMs": (8 - i) * 25});
            (i, bridge.call_tool("echo", args, Some(5_000)).await)
        }
    });
    for (i, result) in futures_util::future::join_all(calls).await {
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(result.data().unwrap()["arguments"]["index"], i);
    }
    bridge.shutdown().await;
}

// ============================================================================
// Failure and recovery
// ============================================================================

#[tokio::test]
async fn test_process_death_mid_call() {
    let mut settings = fast_settings();
    settings.reconnect.base_delay_ms = 300;
    settings.reconnect.max_delay_ms = 1_000;
    let bridge = ready_bridge(settings, vec![echo_server("dying", &["echo", "exit"], &[])]).await;
    let mut events = bridge.subscribe();

    let result = bridge.call_tool("exit", json!({"afterMs": 50}), Some(5_000)).await;
    match &result {
        ToolCallResult::Failure { kind, retryable, .. } => {
            assert_eq!(*kind, ErrorKind::Transport);
            assert!(*retryable);
        }
        other => panic!("expected a transport failure, got {:?}", other),
    }

    // Tools are withdrawn while the connection is not Ready.
    let connection = bridge.registry().connection("dying").unwrap();
    assert!(!connection.is_ready());
    assert!(bridge.list_tools().tools.is_empty());
    assert_eq!(
        bridge.call_tool("echo", json!({}), None).await.error_kind(),
        Some(ErrorKind::NotFound)
    );

    let states = collect_states(&mut events, "dying", |seen| {
        seen.contains(&ConnectionState::Ready)
    })
    .await;
    assert_eq!(
        &states[..3],
        &[
            ConnectionState::Degraded,
            ConnectionState::Connecting,
            ConnectionState::Ready
        ]
    );

    // Back on a fresh process.
    let health = bridge.registry().server_health("dying").unwrap();
    assert_eq!(health.reconnect_attempts, 1);
    assert!(health.last_error.is_some());
    assert_eq!(bridge.metrics().counters().transport_failures, 1);
    let result = bridge.call_tool("echo", json!({"again": true}), None).await;
    assert!(result.is_ok(), "{:?}", result);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_disable_and_enable() {
    let bridge = ready_bridge(fast_settings(), vec![echo_server("echo", &["echo"], &[])]).await;
    let registry = bridge.registry();
    let issued_before = registry.context().ids.issued();

    registry.disable("echo").await.unwrap();
    assert!(bridge.list_tools().tools.is_empty());
    let health = registry.server_health("echo").unwrap();
    assert!(!health.enabled);
    assert_eq!(health.state, ConnectionState::Disconnected);
    assert!(registry.get("echo").is_some());

    registry.enable("echo").await.unwrap();
    let state = registry
        .wait_for_state("echo", ConnectionState::Ready, PATIENCE)
        .await
        .unwrap();
    assert_eq!(state, ConnectionState::Ready);
    assert_eq!(bridge.list_tools().names(), vec!["echo"]);

    // Correlation ids keep counting across connection recreation.
    assert!(registry.context().ids.issued() > issued_before);
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_missing_command_gives_up() {
    let mut settings = fast_settings();
    settings.reconnect.max_retries = 2;
    let config = toolbridge::BridgeConfig::new()
        .with_settings(settings)
        .with_server(toolbridge::ServerConfig::stdio("ghost", "/definitely/not/here"));
    let bridge = toolbridge::ToolBridge::from_config(config).await.unwrap();

    let state = bridge
        .registry()
        .wait_for_state("ghost", ConnectionState::Closed, PATIENCE)
        .await
        .unwrap();
    assert_eq!(state, ConnectionState::Closed);
    let health = bridge.registry().server_health("ghost").unwrap();
    assert_eq!(health.reconnect_attempts, 2);
    assert!(health.last_error.is_some());

    // Enabling again replaces the closed connection.
    bridge.registry().enable("ghost").await.unwrap();
    let connection = bridge.registry().connection("ghost").unwrap();
    assert_ne!(connection.state(), ConnectionState::Closed);
    bridge.shutdown().await;
}

// ============================================================================
// Namespace collisions
// ============================================================================

#[tokio::test]
async fn test_colliding_names_are_qualified() {
    let bridge = ready_bridge(
        fast_settings(),
        vec![
            echo_server("serverA", &["search", "fetch"], &[]),
            echo_server("serverB", &["search"], &[]),
        ],
    )
    .await;

    let snapshot = bridge.list_tools();
    assert_eq!(
        snapshot.names(),
        vec!["fetch", "serverA.search", "serverB.search"]
    );
    assert!(snapshot.has_warnings());
    assert!(snapshot.get("serverA.search").unwrap().ambiguous);
    assert!(!snapshot.get("fetch").unwrap().ambiguous);

    let qualified = bridge.dispatch("serverA.search", json!({}), None).await.unwrap();
    assert_eq!(qualified.server_id, "serverA");
    assert!(qualified.warnings.is_empty());

    let stamp = |id: &str| bridge.registry().connection(id).unwrap().ready_stamp();
    let newest = if stamp("serverA") > stamp("serverB") {
        "serverA"
    } else {
        "serverB"
    };
    let bare = bridge.dispatch("search", json!({}), None).await.unwrap();
    assert_eq!(bare.server_id, newest);
    assert_eq!(bare.tool, "search");
    assert_eq!(bare.warnings.len(), 1);

    bridge.shutdown().await;
}
