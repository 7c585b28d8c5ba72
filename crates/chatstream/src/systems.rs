use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::ToolResult;
use crate::models::tool::Tool;

/// What a tool sees about the call it is serving
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call_id: String,
    /// Cancelled when the turn that issued the call is stopped
    pub cancel: CancellationToken,
}

/// Executes one tool. Results are anything JSON-serializable.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, context: &ToolContext) -> ToolResult<Value>;
}

/// Where the turn controller finds tool declarations and their handlers
pub trait ToolRegistry: Send + Sync {
    /// Declarations offered to the model, fetched once per request build
    fn definitions(&self) -> Vec<Tool>;

    fn lookup(&self, name: &str) -> Option<Arc<dyn ToolHandler>>;
}

/// A registry backed by a fixed map of tools
#[derive(Default, Clone)]
pub struct StaticToolRegistry {
    tools: Vec<Tool>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any earlier one with the same name
    pub fn with_tool<H>(mut self, tool: Tool, handler: H) -> Self
    where
        H: ToolHandler + 'static,
    {
        self.tools.retain(|existing| existing.name != tool.name);
        self.handlers.insert(tool.name.clone(), Arc::new(handler));
        self.tools.push(tool);
        self
    }
}

impl ToolRegistry for StaticToolRegistry {
    fn definitions(&self) -> Vec<Tool> {
        self.tools.clone()
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }
}
