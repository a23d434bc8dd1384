//! Request and response bodies

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::{ClaimedRequest, StatsSnapshot};
use crate::connection::ConnectionSnapshot;

/// `GET /poll` when the channel is usable
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub mcp_connected: bool,
    pub plugin_connected: bool,
    /// Serialized as `null` when there is no work
    pub request: Option<ClaimedRequest>,
}

/// `GET /poll` when the channel is not usable
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRefused {
    pub error: String,
    pub mcp_connected: bool,
    pub plugin_connected: bool,
}

/// `POST /response` body sent by the worker
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    /// Kept as text; an unparseable id is treated like an unknown one
    pub request_id: String,
    #[serde(default)]
    pub response: Value,
    /// Present when the worker failed the request
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub plugin_connected: bool,
    pub mcp_server_active: bool,
    pub pending_requests: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connection: ConnectionSnapshot,
    pub pending_requests: usize,
    pub in_flight_requests: usize,
    pub stats: StatsSnapshot,
    pub request_timeout_ms: u64,
    pub staleness_window_ms: u64,
    pub uptime_secs: u64,
}
