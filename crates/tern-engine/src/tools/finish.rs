use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tern_core::context::ToolContext;
use tern_core::schema::{FieldType, ObjectSchema, ToolSchema};
use tern_core::tools::{parse_args, Tool, ToolError, ToolOutput, ToolSignal};

/// Ends the session once the current round's results are recorded.
pub struct FinishTool;

#[derive(Deserialize)]
struct Input {
    #[serde(default)]
    summary: Option<String>,
}

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        "finish"
    }

    fn description(&self) -> &str {
        "Signal that the task is complete, with an optional summary"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            self.name(),
            self.description(),
            ObjectSchema::new().optional("summary", FieldType::String, "What was accomplished"),
        )
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let input: Input = parse_args(args)?;
        Ok(ToolOutput::ok("finished").with_signal(ToolSignal::Finish {
            summary: input.summary,
        }))
    }
}
