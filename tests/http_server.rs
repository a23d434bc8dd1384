//! Integration tests for the plugin-facing HTTP surface
//!
//! These drive the axum router in-process and cover:
//! - Poll gating on channel liveness
//! - Plugin connection tracking
//! - Disconnect eviction of outstanding calls
//! - Channel activity refresh from MCP tool routes
//! - Full tool call round trips through poll and response

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use mcp_plugin_bridge::{build_registry, BridgeConfig, BridgeError, BridgeServer};
use serde_json::{json, Value};
use tower::ServiceExt;

fn make_server() -> BridgeServer {
    BridgeServer::new(BridgeConfig::default(), build_registry())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    // Extractor rejections come back as plain text
    let parsed = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, parsed)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, None).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Some(body)).await
}

/// Poll until the worker is handed a request
async fn poll_for_request(app: &Router) -> Value {
    loop {
        let (status, body) = get(app, "/poll").await;
        assert_eq!(status, StatusCode::OK);
        if !body["request"].is_null() {
            return body["request"].clone();
        }
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Poll Without Channel
// =============================================================================

/// Poll before any channel activation is refused
#[tokio::test]
async fn test_poll_refused_before_activation() {
    let server = make_server();
    let app = server.router();

    let (status, body) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["mcpConnected"], false);
}

/// Repeated polling never makes the channel look active
#[tokio::test]
async fn test_polling_alone_never_activates() {
    let server = make_server();
    let app = server.router();

    for _ in 0..3 {
        get(&app, "/poll").await;
    }

    let (status, body) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["mcpConnected"], false);
}

/// A refused poll never hands out work
#[tokio::test]
async fn test_refused_poll_leaves_queue_untouched() {
    let server = make_server();
    let app = server.router();
    let pending = server.broker().submit("/api/test", json!({}));

    get(&app, "/poll").await;

    assert_eq!(server.broker().in_flight_count(), 0);
    assert!(server.broker().is_pending(&pending.id()));
}

// =============================================================================
// Poll With Active Channel
// =============================================================================

#[tokio::test]
async fn test_poll_with_active_channel() {
    let server = make_server();
    server.connection().set_channel_active(true);
    let app = server.router();

    let (status, body) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mcpConnected"], true);
    assert_eq!(body["pluginConnected"], true);
}

#[tokio::test]
async fn test_poll_empty_queue_returns_null_request() {
    let server = make_server();
    server.connection().set_channel_active(true);
    let app = server.router();

    let (status, body) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("request").is_some());
    assert!(body["request"].is_null());
}

/// Each queued request is handed out once, oldest first
#[tokio::test]
async fn test_poll_hands_out_each_request_once() {
    let server = make_server();
    server.connection().set_channel_active(true);
    let app = server.router();

    let first = server.broker().submit("/api/one", json!({"n": 1}));
    let second = server.broker().submit("/api/two", json!({"n": 2}));

    let (_, body) = get(&app, "/poll").await;
    assert_eq!(body["request"]["id"], first.id().to_string());
    assert_eq!(body["request"]["endpoint"], "/api/one");
    assert_eq!(body["request"]["payload"], json!({"n": 1}));

    let (_, body) = get(&app, "/poll").await;
    assert_eq!(body["request"]["id"], second.id().to_string());

    let (_, body) = get(&app, "/poll").await;
    assert!(body["request"].is_null());
    assert_eq!(server.broker().pending_count(), 2);
}

// =============================================================================
// Channel Deactivation
// =============================================================================

#[tokio::test]
async fn test_deactivated_channel_refuses_poll() {
    let server = make_server();
    let app = server.router();

    server.connection().set_channel_active(true);
    let (status, body) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mcpConnected"], true);

    server.connection().set_channel_active(false);
    let (status, body) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["mcpConnected"], false);
}

#[tokio::test]
async fn test_reactivation_recovers() {
    let server = make_server();
    let app = server.router();

    server.connection().set_channel_active(true);
    server.connection().set_channel_active(false);
    let (status, _) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    server.connection().set_channel_active(true);
    let (status, body) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mcpConnected"], true);
}

/// An activated channel with no activity goes stale
#[tokio::test(start_paused = true)]
async fn test_stale_channel_refuses_poll() {
    let server = make_server();
    server.connection().set_channel_active(true);
    let app = server.router();

    tokio::time::advance(Duration::from_millis(15_001)).await;

    let (status, body) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["mcpConnected"], false);
}

// =============================================================================
// Plugin Connection Tracking
// =============================================================================

#[tokio::test]
async fn test_poll_marks_plugin_connected() {
    let server = make_server();
    let app = server.router();

    let (_, before) = get(&app, "/health").await;
    assert_eq!(before["pluginConnected"], false);

    get(&app, "/poll").await;

    let (_, after) = get(&app, "/health").await;
    assert_eq!(after["pluginConnected"], true);
}

#[tokio::test]
async fn test_health_does_not_mutate_state() {
    let server = make_server();
    let app = server.router();

    for _ in 0..3 {
        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pluginConnected"], false);
        assert_eq!(body["mcpServerActive"], false);
    }
}

#[tokio::test]
async fn test_ready_marks_plugin_connected() {
    let server = make_server();
    let app = server.router();

    let (status, body) = post(&app, "/ready", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(server.connection().is_worker_connected());
    // Readiness never activates the channel
    assert!(!server.connection().is_channel_active());
}

/// Disconnect settles outstanding calls instead of leaving them to time out
#[tokio::test]
async fn test_disconnect_clears_pending_requests() {
    let server = make_server();
    server.connection().set_channel_active(true);
    let app = server.router();
    post(&app, "/ready", json!({})).await;

    let pending = server.broker().submit("/api/test", json!({}));

    let (status, _) = post(&app, "/disconnect", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending call should settle on disconnect");
    assert_eq!(
        result,
        Err(BridgeError::ConnectionClosed("Connection closed".into()))
    );
    assert_eq!(server.broker().pending_count(), 0);

    let (_, health) = get(&app, "/health").await;
    assert_eq!(health["pluginConnected"], false);
}

// =============================================================================
// MCP Tool Routes
// =============================================================================

/// Tool route calls keep the channel fresh even when the tool fails
#[tokio::test(start_paused = true)]
async fn test_tool_route_refreshes_channel_activity() {
    let server = make_server();
    server.connection().set_channel_active(true);
    let app = server.router();

    tokio::time::advance(Duration::from_secs(10)).await;
    let (status, _) = post(&app, "/mcp/no_such_tool", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // 20s since activation, 10s since the last tool call
    tokio::time::advance(Duration::from_secs(10)).await;
    let (status, body) = get(&app, "/poll").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mcpConnected"], true);
}

#[tokio::test]
async fn test_tool_route_rejects_invalid_json() {
    let server = make_server();
    let app = server.router();

    let req = Request::builder()
        .method("POST")
        .uri("/mcp/get_place_info")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(server.broker().pending_count(), 0);
}

/// Tool call -> poll -> response -> tool result
#[tokio::test]
async fn test_tool_call_round_trip() {
    let server = make_server();
    server.connection().set_channel_active(true);
    let app = server.router();

    let call = {
        let app = app.clone();
        tokio::spawn(async move { post(&app, "/mcp/get_place_info", json!({})).await })
    };

    let request = poll_for_request(&app).await;
    assert_eq!(request["endpoint"], "/api/place-info");

    let (status, ack) = post(
        &app,
        "/response",
        json!({
            "requestId": request["id"],
            "response": {"placeName": "Baseplate", "placeId": 42}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], true);

    let (status, body) = call.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"placeName": "Baseplate", "placeId": 42}));
    assert_eq!(server.broker().pending_count(), 0);
}

#[tokio::test]
async fn test_worker_error_fails_tool_call() {
    let server = make_server();
    server.connection().set_channel_active(true);
    let app = server.router();

    let call = {
        let app = app.clone();
        tokio::spawn(async move {
            post(&app, "/mcp/get_instance_properties", json!({"instancePath": "game.Workspace"}))
                .await
        })
    };

    let request = poll_for_request(&app).await;
    assert_eq!(request["payload"]["instancePath"], "game.Workspace");
    post(
        &app,
        "/response",
        json!({"requestId": request["id"], "error": "Instance not found"}),
    )
    .await;

    let (status, body) = call.await.unwrap();
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Worker error: Instance not found");
}

/// A tool call nobody answers fails with a timeout instead of hanging
#[tokio::test(start_paused = true)]
async fn test_unanswered_tool_call_times_out() {
    let config = BridgeConfig {
        request_timeout_ms: 1_000,
        ..BridgeConfig::default()
    };
    let server = BridgeServer::new(config, build_registry());
    server.connection().set_channel_active(true);
    let app = server.router();

    let (status, body) = post(&app, "/mcp/get_services", json!({})).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "Request timeout after 1000ms");
    assert_eq!(server.broker().pending_count(), 0);
}

// =============================================================================
// Worker Responses
// =============================================================================

/// Responses for unknown or already-settled ids are accepted and ignored
#[tokio::test]
async fn test_late_response_is_noop() {
    let server = make_server();
    let app = server.router();

    let pending = server.broker().submit("/api/test", json!({}));
    let id = pending.id();
    assert!(server.broker().resolve(id, json!("first")));

    let (status, body) = post(
        &app,
        "/response",
        json!({"requestId": id.to_string(), "response": "second"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(pending.await.unwrap(), json!("first"));
}

#[tokio::test]
async fn test_response_with_malformed_id_is_ignored() {
    let server = make_server();
    let app = server.router();
    let pending = server.broker().submit("/api/test", json!({}));

    let (status, body) = post(
        &app,
        "/response",
        json!({"requestId": "nope", "response": "stray"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // Nothing was settled by the stray response
    assert!(server.broker().is_pending(&pending.id()));
    assert_eq!(server.broker().stats().snapshot().total_resolved, 0);
}

// =============================================================================
// Status
// =============================================================================

#[tokio::test]
async fn test_status_reports_connection_and_queue() {
    let server = make_server();
    server.connection().set_channel_active(true);
    let app = server.router();

    let _first = server.broker().submit("/api/one", json!({}));
    let _second = server.broker().submit("/api/two", json!({}));
    get(&app, "/poll").await;

    let (status, body) = get(&app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connection"]["phase"], "active");
    assert_eq!(body["connection"]["workerConnected"], true);
    assert_eq!(body["pendingRequests"], 2);
    assert_eq!(body["inFlightRequests"], 1);
    assert_eq!(body["stats"]["totalSubmitted"], 2);
    assert_eq!(body["requestTimeoutMs"], 120_000);
    assert_eq!(body["stalenessWindowMs"], 15_000);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let server = make_server();
    let app = server.router();

    let (status, _) = get(&app, "/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
