//! Connection State Machine
//!
//! Two independent liveness signals:
//! - the channel (`INACTIVE -> ACTIVE -> INACTIVE/STALE`), set only by the
//!   owner of the channel transport and kept fresh by channel activity
//! - the worker, marked connected when it polls and cleared on disconnect
//!
//! Polling never activates the channel. A worker that keeps polling with no
//! live channel behind it must still be refused.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;

/// Staleness window used when none is configured
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_millis(15_000);

/// Channel phase, derived at a point in time
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPhase {
    /// Never activated, or explicitly deactivated
    Inactive,
    /// Activated and seen within the staleness window
    Active,
    /// Activated but no activity within the staleness window.
    /// Gated exactly like `Inactive`.
    Stale,
}

impl ChannelPhase {
    pub fn is_usable(self) -> bool {
        self == ChannelPhase::Active
    }
}

impl std::fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelPhase::Inactive => write!(f, "Inactive"),
            ChannelPhase::Active => write!(f, "Active"),
            ChannelPhase::Stale => write!(f, "Stale"),
        }
    }
}

/// Reportable view of the connection state
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub phase: ChannelPhase,
    pub channel_active: bool,
    pub worker_connected: bool,
    pub last_channel_activity: Option<DateTime<Utc>>,
    pub idle_ms: Option<u64>,
}

#[derive(Default)]
struct Fields {
    channel_active: bool,
    last_channel_activity: Option<Instant>,
    /// Wall-clock twin of `last_channel_activity`, for reporting only
    last_channel_activity_at: Option<DateTime<Utc>>,
    worker_connected: bool,
}

impl Fields {
    fn touch(&mut self) {
        self.last_channel_activity = Some(Instant::now());
        self.last_channel_activity_at = Some(Utc::now());
    }
}

/// Thread-safe connection state shared by the HTTP routes and the channel owner
pub struct ConnectionState {
    fields: RwLock<Fields>,
    staleness_window: Duration,
}

impl ConnectionState {
    /// Create a state machine in the `Inactive` phase with the default window
    pub fn new() -> Self {
        Self::with_staleness_window(DEFAULT_STALENESS_WINDOW)
    }

    pub fn with_staleness_window(staleness_window: Duration) -> Self {
        Self {
            fields: RwLock::new(Fields::default()),
            staleness_window,
        }
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    /// Activate or deactivate the channel.
    ///
    /// The only way the channel becomes active. Activation also counts as activity.
    pub fn set_channel_active(&self, active: bool) {
        let mut fields = self.fields.write();
        let was_active = fields.channel_active;
        fields.channel_active = active;
        if active {
            fields.touch();
        }
        if was_active != active {
            tracing::info!(active, "MCP channel state changed");
        }
    }

    /// Record channel-originated activity without changing the active flag
    pub fn note_channel_activity(&self) {
        self.fields.write().touch();
    }

    /// Record a worker poll attempt
    pub fn note_worker_poll(&self) {
        let mut fields = self.fields.write();
        if !fields.worker_connected {
            tracing::info!("Plugin worker connected");
        }
        fields.worker_connected = true;
    }

    /// Forget the worker after an explicit disconnect
    pub fn clear_worker_connection(&self) {
        let mut fields = self.fields.write();
        if fields.worker_connected {
            tracing::info!("Plugin worker disconnected");
        }
        fields.worker_connected = false;
    }

    pub fn is_worker_connected(&self) -> bool {
        self.fields.read().worker_connected
    }

    pub fn is_channel_active(&self) -> bool {
        self.fields.read().channel_active
    }

    /// Derive the channel phase at `now`
    pub fn channel_phase(&self, now: Instant) -> ChannelPhase {
        let fields = self.fields.read();
        if !fields.channel_active {
            return ChannelPhase::Inactive;
        }
        let fresh = fields
            .last_channel_activity
            .is_some_and(|last| now.saturating_duration_since(last) < self.staleness_window);
        if fresh {
            ChannelPhase::Active
        } else {
            ChannelPhase::Stale
        }
    }

    /// Whether poll attempts may be served at `now`
    pub fn is_channel_usable(&self, now: Instant) -> bool {
        self.channel_phase(now).is_usable()
    }

    pub fn snapshot(&self, now: Instant) -> ConnectionSnapshot {
        let phase = self.channel_phase(now);
        let fields = self.fields.read();
        ConnectionSnapshot {
            phase,
            channel_active: fields.channel_active,
            worker_connected: fields.worker_connected,
            last_channel_activity: fields.last_channel_activity_at,
            idle_ms: fields
                .last_channel_activity
                .map(|last| now.saturating_duration_since(last).as_millis() as u64),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
