//! Request-correlation broker
//!
//! Bridges call/await style callers and a poll-only worker: callers submit
//! work and await a result, the worker claims work by polling and reports
//! back by correlation id.

pub mod broker;
pub mod correlation;
pub mod error;

pub use broker::{
    spawn_sweeper, BrokerStats, ClaimedRequest, CorrelationBroker, PendingResponse, StatsSnapshot,
};
pub use correlation::CorrelationId;
pub use error::BridgeError;
