//! Plugin-facing HTTP surface
//!
//! The plugin worker polls `/poll` and reports back on `/response`; MCP
//! channel calls arrive on `/mcp/{tool}`.

pub mod error;
pub mod middleware;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use server::{AppState, BridgeServer};
