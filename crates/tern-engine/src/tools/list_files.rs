use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tern_core::context::ToolContext;
use tern_core::schema::{FieldType, ObjectSchema, ToolSchema};
use tern_core::tools::{parse_args, Tool, ToolError, ToolOutput};

/// Lists one directory level, directories suffixed with `/`.
pub struct ListFilesTool;

#[derive(Deserialize)]
struct Input {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    include_hidden: bool,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a directory"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            self.name(),
            self.description(),
            ObjectSchema::new()
                .optional("path", FieldType::String, "Directory to list (defaults to working directory)")
                .optional("include_hidden", FieldType::Boolean, "Include dotfiles"),
        )
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let input: Input = parse_args(args)?;
        let dir = match &input.path {
            Some(p) => ctx.resolve(p),
            None => ctx.working_directory.clone(),
        };

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ToolError::Execution(format!("failed to list {}: {e}", dir.display())))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !input.include_hidden && name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        Ok(ToolOutput::ok(json!({
            "path": dir.display().to_string(),
            "entries": entries,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::ctx;
    use std::fs;

    #[tokio::test]
    async fn lists_sorted_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::write(dir.path().join(".hidden"), "").unwrap();

        let out = ListFilesTool.execute(Value::Null, &ctx(dir.path())).await.unwrap();
        assert_eq!(out.output["entries"], json!(["a.txt", "b.txt", "src/"]));
    }

    #[tokio::test]
    async fn hidden_on_request() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), "").unwrap();
        let out = ListFilesTool
            .execute(json!({"include_hidden": true}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.output["entries"], json!([".env"]));
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ListFilesTool
            .execute(json!({"path": "nope"}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }
}
