//! Channel activity tracking for MCP tool routes

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::server::AppState;

/// Refresh channel activity before any `/mcp/*` handler runs, whatever its outcome
pub async fn track_channel_activity(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    state.connection.note_channel_activity();
    next.run(request).await
}
