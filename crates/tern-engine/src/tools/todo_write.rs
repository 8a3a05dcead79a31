use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tern_core::context::ToolContext;
use tern_core::schema::{FieldType, ObjectSchema, ToolSchema};
use tern_core::tools::{parse_args, ExecutionMode, Tool, ToolError, ToolOutput};

/// A single plan item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// Validates a plan and returns it as the call's result, so the plan lives
/// in the transcript.
pub struct TodoWriteTool;

#[derive(Deserialize)]
struct Input {
    todos: Vec<TodoItem>,
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create or replace the task plan for the current session"
    }

    fn schema(&self) -> ToolSchema {
        let item = ObjectSchema::new()
            .required("id", FieldType::String, "Stable item id")
            .required("content", FieldType::String, "What to do")
            .required(
                "status",
                FieldType::one_of(["pending", "in_progress", "completed"]),
                "Item status",
            );
        ToolSchema::new(
            self.name(),
            self.description(),
            ObjectSchema::new().required(
                "todos",
                FieldType::array(FieldType::Object(item)),
                "The full plan to write",
            ),
        )
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Concurrent
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let input: Input = parse_args(args)?;
        let mut seen = HashSet::new();
        if let Some(dup) = input.todos.iter().find(|t| !seen.insert(t.id.as_str())) {
            return Err(ToolError::InvalidArguments(format!("duplicate todo id '{}'", dup.id)));
        }
        if input.todos.iter().filter(|t| t.status == TodoStatus::InProgress).count() > 1 {
            return Err(ToolError::InvalidArguments("at most one todo may be in_progress".into()));
        }

        let total = input.todos.len();
        let open = input.todos.iter().filter(|t| t.status != TodoStatus::Completed).count();
        Ok(ToolOutput::ok(json!({
            "todos": input.todos,
            "total": total,
            "open": open,
        })))
    }
}
