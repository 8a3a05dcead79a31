use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tern_core::context::ToolContext;
use tern_core::schema::{FieldType, ObjectSchema, ToolSchema};
use tern_core::tools::{parse_args, Tool, ToolError, ToolOutput};

const DEFAULT_LIMIT: usize = 2000;
const MAX_LINE_LEN: usize = 2000;

pub struct ReadFileTool;

#[derive(Deserialize)]
struct Input {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents with line numbers"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            self.name(),
            self.description(),
            ObjectSchema::new()
                .required("path", FieldType::String, "File to read, absolute or relative to the working directory")
                .optional("offset", FieldType::Integer, "Line number to start reading from (1-based)")
                .optional("limit", FieldType::Integer, "Maximum number of lines to read"),
        )
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let input: Input = parse_args(args)?;
        let path = ctx.resolve(&input.path);

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Execution(format!("failed to read {}: {e}", path.display())))?;

        let offset = input.offset.unwrap_or(1).max(1);
        let limit = input.limit.unwrap_or(DEFAULT_LIMIT);

        let mut output = String::new();
        for (i, line) in content.lines().enumerate().skip(offset - 1).take(limit) {
            let line = match line.char_indices().nth(MAX_LINE_LEN) {
                Some((cut, _)) => &line[..cut],
                None => line,
            };
            output.push_str(&format!("{:>6}\t{}\n", i + 1, line));
        }

        if output.is_empty() {
            output = "(empty file)".to_string();
        }
        Ok(ToolOutput::ok(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::ctx;
    use serde_json::json;
    use std::fs;

    #[tokio::test]
    async fn read_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("test.txt"), "line 1\nline 2\nline 3\n").unwrap();

        let out = ReadFileTool
            .execute(json!({"path": "test.txt"}), &ctx(dir.path()))
            .await
            .unwrap();
        let text = out.output.as_str().unwrap();
        assert!(text.contains("     1\tline 1"));
        assert!(text.contains("     3\tline 3"));
    }

    #[tokio::test]
    async fn read_with_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let content: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        fs::write(dir.path().join("test.txt"), &content).unwrap();

        let out = ReadFileTool
            .execute(json!({"path": "test.txt", "offset": 3, "limit": 2}), &ctx(dir.path()))
            .await
            .unwrap();
        let text = out.output.as_str().unwrap();
        assert!(text.contains("line 3"));
        assert!(text.contains("line 4"));
        assert!(!text.contains("line 5"));
    }

    #[tokio::test]
    async fn read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .execute(json!({"path": "nope.txt"}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }

    #[tokio::test]
    async fn repeated_reads_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "same").unwrap();
        let ctx = ctx(dir.path());
        let a = ReadFileTool.execute(json!({"path": "a.txt"}), &ctx).await.unwrap();
        let b = ReadFileTool.execute(json!({"path": "a.txt"}), &ctx).await.unwrap();
        assert_eq!(a, b);
    }
}
