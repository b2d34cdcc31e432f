//! Tool registry and built-in tools for Cairn.
//!
//! The [`ToolRegistry`] is the single gate every tool call passes through:
//! it checks the caller's groups, validates arguments against the tool's
//! schema, writes the audit trail, and stamps the result metadata.
//!
//! Built-in tools:
//! - memory tools that search and grow the agent's long-term memory
//! - `run_sql`, backed by any [`SqlRunner`] (SQLite via `sqlx` with the
//!   `sqlite` feature), optionally behind the [`ReadOnlySqlRunner`] guard

pub mod memory_tools;
pub mod registry;
pub mod schema;
pub mod sql;

use std::sync::Arc;

pub use memory_tools::{SaveQuestionToolArgsTool, SaveTextMemoryTool, SearchSavedToolUsesTool};
pub use registry::{can_access, ArgumentTransformer, PassthroughTransformer, ToolRegistry, TransformOutcome};
pub use schema::validate_arguments;
pub use sql::{validate_read_only, QueryRows, ReadOnlySqlRunner, RunSqlTool, SqlRunner};

#[cfg(feature = "sqlite")]
pub use sql::SqliteRunner;

/// Register the three memory tools.
///
/// Searching is open to everyone; saving is limited to `save_groups`
/// (pass an empty list to let everyone save).
pub fn register_memory_tools(registry: &mut ToolRegistry, save_groups: &[String]) {
    registry.register_local_tool(Arc::new(SearchSavedToolUsesTool), Vec::new());
    registry.register_local_tool(Arc::new(SaveQuestionToolArgsTool), save_groups.to_vec());
    registry.register_local_tool(Arc::new(SaveTextMemoryTool), save_groups.to_vec());
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::user::User;

    #[test]
    fn memory_tools_respect_save_groups() {
        let mut registry = ToolRegistry::new();
        register_memory_tools(&mut registry, &["admin".to_string()]);
        assert_eq!(registry.len(), 3);

        let visitor: Vec<String> = registry.get_schemas(&User::new("v")).into_iter().map(|s| s.name).collect();
        assert_eq!(visitor, vec!["search_saved_correct_tool_uses"]);

        let admin = registry.get_schemas(&User::new("a").with_group("admin"));
        assert_eq!(admin.len(), 3);
        assert_eq!(admin[0].name, "save_question_tool_args");
    }
}
