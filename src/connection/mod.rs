//! Connection liveness tracking
//!
//! Decides whether the MCP channel is usable and whether the plugin worker
//! has been seen, from explicit signals and activity timestamps.

pub mod state;

pub use state::*;
