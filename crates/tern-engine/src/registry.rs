use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use tern_core::context::ToolContext;
use tern_core::schema::{ObjectSchema, ToolSchema};
use tern_core::tools::{ExecutionMode, Tool, ToolError, ToolOutput};

/// Why a tool invocation produced no output.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    SchemaValidation { tool: String, message: String },

    #[error("{0}")]
    Execution(ToolError),

    /// The tool's environment is broken. Ends the turn.
    #[error("{0}")]
    Infrastructure(String),
}

impl InvokeError {
    /// Kind recorded in the `tool_result` error payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "UnknownTool",
            Self::SchemaValidation { .. } => "SchemaValidation",
            Self::Execution(ToolError::InvalidArguments(_)) => "InvalidArguments",
            Self::Execution(ToolError::Timeout(_)) => "Timeout",
            Self::Execution(ToolError::Cancelled) => "Cancelled",
            Self::Execution(_) => "ExecutionError",
            Self::Infrastructure(_) => "ToolInfrastructureError",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

impl From<ToolError> for InvokeError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Infrastructure(message) => Self::Infrastructure(message),
            other => Self::Execution(other),
        }
    }
}

type Handler = dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync;

/// A tool backed by a closure, registered through [`ToolRegistry::register_fn`].
struct FnTool {
    schema: ToolSchema,
    handler: Box<Handler>,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.schema.name
    }

    fn description(&self) -> &str {
        &self.schema.description
    }

    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        (self.handler)(args, ctx.clone()).await
    }
}

/// Registry of available tools. Read-only once the orchestrator holds it.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Register a closure as a concurrent, non-idempotent tool.
    pub fn register_fn<F, Fut>(&mut self, name: &str, description: &str, parameters: ObjectSchema, f: F)
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let handler: Box<Handler> = Box::new(move |args, ctx| Box::pin(f(args, ctx)));
        self.register(Arc::new(FnTool {
            schema: ToolSchema::new(name, description, parameters),
            handler,
        }));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas handed to the provider, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execution mode of a registered tool. Unknown tools run unthrottled
    /// because they fail immediately.
    pub fn execution_mode(&self, name: &str) -> Option<ExecutionMode> {
        self.tools.get(name).map(|t| t.execution_mode())
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Look up, validate and run a tool.
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolOutput, InvokeError> {
        let tool = self
            .get(name)
            .ok_or_else(|| InvokeError::UnknownTool(name.to_string()))?;

        tool.schema()
            .parameters
            .validate(&args)
            .map_err(|message| InvokeError::SchemaValidation {
                tool: name.to_string(),
                message,
            })?;

        tool.execute(args, ctx).await.map_err(InvokeError::from)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
