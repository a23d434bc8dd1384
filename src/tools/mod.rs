//! Tool surface
//!
//! A tool is what an MCP channel call resolves to. Tools reach the plugin
//! worker by submitting to the [`CorrelationBroker`] and awaiting the reply.

pub mod forward;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::bridge::{BridgeError, CorrelationBroker};

pub use forward::ForwardTool;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn description(&self) -> &str {
        "No description available"
    }

    async fn call(&self, broker: &CorrelationBroker, args: Value) -> Result<Value, ToolError>;
}

/// Tools keyed by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(mut self, tool: impl ToolHandler) -> Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            tracing::warn!(tool = %name, "Replaced existing tool registration");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn dispatch(
        &self,
        name: &str,
        broker: &CorrelationBroker,
        args: Value,
    ) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tracing::debug!(tool = %name, "Dispatching tool call");
        tool.call(broker, args).await
    }
}
