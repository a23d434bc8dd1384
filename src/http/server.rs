//! `BridgeServer`: axum HTTP server for the plugin worker and MCP tool calls.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use super::middleware::track_channel_activity;
use super::types::{
    Ack, HealthResponse, PollRefused, PollResponse, StatusResponse, WorkerResponse,
};
use crate::bridge::{BridgeError, CorrelationBroker, CorrelationId};
use crate::config::BridgeConfig;
use crate::connection::ConnectionState;
use crate::tools::ToolRegistry;

const SERVICE_NAME: &str = "mcp-plugin-bridge";

/// Reason attached to requests evicted by `POST /disconnect`
pub const DISCONNECT_REASON: &str = "Connection closed";

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: CorrelationBroker,
    pub connection: Arc<ConnectionState>,
    pub tools: Arc<ToolRegistry>,
    pub start_time: Instant,
}

impl AppState {
    fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// The plugin bridge server.
pub struct BridgeServer {
    config: BridgeConfig,
    state: AppState,
}

impl BridgeServer {
    pub fn new(config: BridgeConfig, tools: ToolRegistry) -> Self {
        let state = AppState {
            broker: CorrelationBroker::with_timeout(config.request_timeout()),
            connection: Arc::new(ConnectionState::with_staleness_window(
                config.staleness_window(),
            )),
            tools: Arc::new(tools),
            start_time: Instant::now(),
        };
        Self { config, state }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let mcp = Router::new()
            .route("/mcp/:tool", post(tool_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                track_channel_activity,
            ));

        Router::new()
            .route("/poll", get(poll_handler))
            .route("/ready", post(ready_handler))
            .route("/response", post(response_handler))
            .route("/disconnect", post(disconnect_handler))
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .merge(mcp)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve on `listener` until `shutdown` completes.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }

    pub fn broker(&self) -> &CorrelationBroker {
        &self.state.broker
    }

    /// Connection state; the channel transport owner activates the channel through this.
    pub fn connection(&self) -> &Arc<ConnectionState> {
        &self.state.connection
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.state.tools
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// GET /poll
///
/// Every poll marks the worker connected. Work is only handed out while the
/// channel is usable.
async fn poll_handler(State(state): State<AppState>) -> Response {
    state.connection.note_worker_poll();

    if !state.connection.is_channel_usable(Instant::now()) {
        let body = PollRefused {
            error: "MCP server not connected".to_string(),
            mcp_connected: false,
            plugin_connected: true,
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }

    Json(PollResponse {
        mcp_connected: true,
        plugin_connected: true,
        request: state.broker.claim_next(),
    })
    .into_response()
}

/// POST /ready
async fn ready_handler(State(state): State<AppState>) -> Json<Ack> {
    state.connection.note_worker_poll();
    tracing::info!("Plugin reported ready");
    Json(Ack::ok())
}

/// POST /response
///
/// Late or duplicate responses for ids no longer pending are accepted and
/// dropped, as are responses whose id is not a valid correlation id.
async fn response_handler(
    State(state): State<AppState>,
    Json(body): Json<WorkerResponse>,
) -> Json<Ack> {
    let Ok(id) = body.request_id.parse::<CorrelationId>() else {
        tracing::warn!(request_id = %body.request_id, "Ignoring response with malformed id");
        return Json(Ack::ok());
    };

    match body.error {
        Some(error) => {
            let message = match error {
                Value::String(message) => message,
                other => other.to_string(),
            };
            state.broker.reject(id, BridgeError::Worker(message));
        }
        None => {
            state.broker.resolve(id, body.response);
        }
    }
    Json(Ack::ok())
}

/// POST /disconnect
async fn disconnect_handler(State(state): State<AppState>) -> Json<Ack> {
    state.connection.clear_worker_connection();
    let cleared = state.broker.clear_all(DISCONNECT_REASON);
    tracing::info!(cleared, "Plugin disconnected");
    Json(Ack::ok())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        plugin_connected: state.connection.is_worker_connected(),
        mcp_server_active: state.connection.is_channel_usable(Instant::now()),
        pending_requests: state.broker.pending_count(),
        uptime_secs: state.uptime_secs(),
    })
}

/// GET /status
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connection: state.connection.snapshot(Instant::now()),
        pending_requests: state.broker.pending_count(),
        in_flight_requests: state.broker.in_flight_count(),
        stats: state.broker.stats().snapshot(),
        request_timeout_ms: state.broker.request_timeout().as_millis() as u64,
        staleness_window_ms: state.connection.staleness_window().as_millis() as u64,
        uptime_secs: state.uptime_secs(),
    })
}

/// POST /mcp/{tool}
///
/// An empty body is treated as no arguments.
async fn tool_handler(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let args = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?
    };

    let result = state.tools.dispatch(&tool, &state.broker, args).await?;
    Ok(Json(result))
}
