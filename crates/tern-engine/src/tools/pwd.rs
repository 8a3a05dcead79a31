use async_trait::async_trait;
use serde_json::Value;
use tern_core::context::ToolContext;
use tern_core::schema::{ObjectSchema, ToolSchema};
use tern_core::tools::{Tool, ToolError, ToolOutput};

pub struct PwdTool;

#[async_trait]
impl Tool for PwdTool {
    fn name(&self) -> &str {
        "pwd"
    }

    fn description(&self) -> &str {
        "Print the current working directory"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(self.name(), self.description(), ObjectSchema::new())
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::ok(ctx.working_directory.display().to_string()))
    }
}
