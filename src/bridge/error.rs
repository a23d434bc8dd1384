//! Broker error types
//!
//! These errors reach callers only through the settlement of their
//! [`PendingResponse`](super::PendingResponse); the broker never fails a
//! `submit`, `claim_next`, `resolve` or `reject` call synchronously.

use super::correlation::CorrelationId;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// No worker response arrived within the request timeout
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The channel was torn down while the request was outstanding
    #[error("{0}")]
    ConnectionClosed(String),

    /// The worker reported a failure for this request
    #[error("Worker error: {0}")]
    Worker(String),

    /// A response arrived for an id that is no longer pending.
    /// Logged, never delivered to a caller.
    #[error("Unknown or expired correlation id: {0}")]
    UnknownCorrelationId(CorrelationId),
}

impl BridgeError {
    /// Whether this error was produced by the timeout path
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    /// Whether this error was produced by a channel teardown
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, BridgeError::ConnectionClosed(_))
    }
}
