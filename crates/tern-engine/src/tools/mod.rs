pub mod finish;
pub mod glob;
pub mod list_files;
pub mod pwd;
pub mod read_file;
pub mod todo_write;
pub mod write_file;

use std::sync::Arc;

use crate::registry::ToolRegistry;

/// Create a ToolRegistry with all built-in tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Workspace inspection
    registry.register(Arc::new(pwd::PwdTool));
    registry.register(Arc::new(list_files::ListFilesTool));
    registry.register(Arc::new(read_file::ReadFileTool));
    registry.register(Arc::new(glob::GlobTool));

    // Mutation
    registry.register(Arc::new(write_file::WriteFileTool));

    // Planning
    registry.register(Arc::new(todo_write::TodoWriteTool));

    // Control
    registry.register(Arc::new(finish::FinishTool));

    registry
}


#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::tools::ExecutionMode;

    #[test]
    fn default_registry_contents() {
        let reg = create_default_registry();
        assert_eq!(
            reg.names(),
            vec!["finish", "glob", "list_files", "pwd", "read_file", "todo_write", "write_file"]
        );
        assert_eq!(reg.execution_mode("write_file"), Some(ExecutionMode::Sequential));
        assert_eq!(reg.execution_mode("read_file"), Some(ExecutionMode::Concurrent));
    }

    #[test]
    fn pure_tools_are_idempotent() {
        let reg = create_default_registry();
        for name in ["pwd", "read_file", "list_files", "glob"] {
            assert!(reg.get(name).unwrap().idempotent(), "{name}");
        }
        assert!(!reg.get("write_file").unwrap().idempotent());
    }
}
