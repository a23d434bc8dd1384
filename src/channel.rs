//! Channel lifecycle driven by the process's stdio transport
//!
//! The process that owns the MCP channel is the only authority allowed to
//! activate it. Here that is stdio: the channel is active from attach until
//! EOF, inbound lines count as activity, and a keepalive tick keeps an idle
//! but attached channel from going stale.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::MissedTickBehavior;

use crate::bridge::CorrelationBroker;
use crate::connection::ConnectionState;

/// Reason attached to requests evicted when the channel detaches
pub const CHANNEL_CLOSED_REASON: &str = "MCP channel closed";

pub struct StdioChannel {
    connection: Arc<ConnectionState>,
    broker: CorrelationBroker,
    keepalive: Duration,
}

impl StdioChannel {
    pub fn new(
        connection: Arc<ConnectionState>,
        broker: CorrelationBroker,
        keepalive: Duration,
    ) -> Self {
        Self {
            connection,
            broker,
            keepalive,
        }
    }

    /// Attach to `reader` and run until it reaches EOF or fails.
    ///
    /// The channel is deactivated and every pending request is cleared on
    /// exit, so no caller waits out the request timeout.
    pub async fn run<R>(self, reader: R) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.connection.set_channel_active(true);
        tracing::info!("MCP channel attached");

        let mut lines = BufReader::new(reader).lines();
        let mut keepalive = tokio::time::interval(self.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(_)) => self.connection.note_channel_activity(),
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
                _ = keepalive.tick() => self.connection.note_channel_activity(),
            }
        };

        self.detach();
        result
    }

    fn detach(&self) {
        self.connection.set_channel_active(false);
        let cleared = self.broker.clear_all(CHANNEL_CLOSED_REASON);
        tracing::info!(cleared, "MCP channel detached");
    }
}
