use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tern_core::context::ToolContext;
use tern_core::schema::{FieldType, ObjectSchema, ToolSchema};
use tern_core::tools::{parse_args, ExecutionMode, Tool, ToolError, ToolOutput};

pub struct WriteFileTool;

#[derive(Deserialize)]
struct Input {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            self.name(),
            self.description(),
            ObjectSchema::new()
                .required("path", FieldType::String, "File to write, absolute or relative to the working directory")
                .required("content", FieldType::String, "Content to write to the file"),
        )
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let input: Input = parse_args(args)?;
        let path = ctx.resolve(&input.path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Execution(format!("failed to create directory: {e}")))?;
        }

        tokio::fs::write(&path, &input.content)
            .await
            .map_err(|e| ToolError::Execution(format!("failed to write {}: {e}", path.display())))?;

        Ok(ToolOutput::ok(format!(
            "Wrote {} bytes ({} lines) to {}",
            input.content.len(),
            input.content.lines().count(),
            path.display()
        )))
    }
}
