use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tern_core::context::ToolContext;
use tern_core::schema::{FieldType, ObjectSchema, ToolSchema};
use tern_core::tools::{parse_args, Tool, ToolError, ToolOutput};

pub struct GlobTool;

#[derive(Deserialize)]
struct Input {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            self.name(),
            self.description(),
            ObjectSchema::new()
                .required("pattern", FieldType::String, "Glob pattern (e.g. '**/*.rs', 'src/**/*.ts')")
                .optional("path", FieldType::String, "Directory to search in (defaults to working directory)"),
        )
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let input: Input = parse_args(args)?;
        let base_dir = match &input.path {
            Some(p) => ctx.resolve(p),
            None => ctx.working_directory.clone(),
        };

        let pattern = base_dir.join(&input.pattern).to_string_lossy().to_string();
        glob::Pattern::new(&pattern).map_err(|e| ToolError::InvalidArguments(format!("bad pattern: {e}")))?;

        // glob walks the filesystem synchronously
        let base = base_dir.clone();
        let mut matches = tokio::task::spawn_blocking(move || glob_match(&pattern))
            .await
            .map_err(|e| ToolError::Execution(format!("glob task failed: {e}")))?;
        matches.sort();

        let files: Vec<String> = matches
            .iter()
            .map(|p| p.strip_prefix(&base).unwrap_or(p).display().to_string())
            .collect();

        Ok(ToolOutput::ok(json!({
            "count": files.len(),
            "files": files,
        })))
    }
}

fn glob_match(pattern: &str) -> Vec<PathBuf> {
    match glob::glob(pattern) {
        Ok(entries) => entries.flatten().collect(),
        Err(_) => Vec::new(),
    }
}
