//! HTTP error responses
//!
//! Every error leaves the server as `{"error": "<message>"}` with a status
//! derived from its kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::bridge::BridgeError;
use crate::tools::ToolError;

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<ToolError> for ApiError {
    fn from(e: ToolError) -> Self {
        let status = match &e {
            ToolError::NotFound(_) => StatusCode::NOT_FOUND,
            ToolError::InvalidArgs(_) => StatusCode::BAD_REQUEST,
            ToolError::Bridge(BridgeError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ToolError::Bridge(BridgeError::ConnectionClosed(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ToolError::Bridge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
