pub mod bridge;
pub mod builder;
pub mod channel;
pub mod config;
pub mod connection;
pub mod http;
pub mod tools;

// Re-export commonly used items
pub use bridge::{BridgeError, CorrelationBroker, CorrelationId};
pub use builder::build_registry;
pub use config::BridgeConfig;
pub use connection::ConnectionState;
pub use crate::http::BridgeServer;
