//! Tool that forwards its arguments to a fixed plugin endpoint

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ToolError, ToolHandler};
use crate::bridge::CorrelationBroker;

#[derive(Debug, Clone)]
pub struct ForwardTool {
    name: String,
    endpoint: String,
    description: String,
}

impl ForwardTool {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ToolHandler for ForwardTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        if self.description.is_empty() {
            "No description available"
        } else {
            &self.description
        }
    }

    async fn call(&self, broker: &CorrelationBroker, args: Value) -> Result<Value, ToolError> {
        // The plugin expects an object payload; a missing body is an empty one.
        let payload = match args {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(ToolError::InvalidArgs(format!(
                    "expected a JSON object, got {other}"
                )))
            }
        };

        let pending = broker.submit(self.endpoint.as_str(), payload);
        tracing::debug!(
            tool = %self.name,
            endpoint = %self.endpoint,
            correlation_id = %pending.id(),
            "Forwarding tool call to plugin"
        );
        Ok(pending.await?)
    }
}
