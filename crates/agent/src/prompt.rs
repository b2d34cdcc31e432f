//! System prompt builders.
//!
//! Both builders append memory-workflow instructions when the caller can see
//! any of the memory tools, so the model knows to search before acting and to
//! save what worked.

use async_trait::async_trait;
use cairn_core::error::HookError;
use cairn_core::extension::SystemPromptBuilder;
use cairn_core::tool::ToolSchema;
use cairn_core::user::User;
use cairn_tools::memory_tools::{SAVE_TEXT_MEMORY, SAVE_TOOL_USE, SEARCH_TOOL_USES};
use chrono::Local;

// ── Memory workflow ───────────────────────────────────────────────────────

/// Instructions for whichever memory tools appear in `tools`.
///
/// Returns an empty string when none of them do.
pub fn memory_workflow_instructions(tools: &[ToolSchema]) -> String {
    let has = |name: &str| tools.iter().any(|t| t.name == name);
    let has_search = has(SEARCH_TOOL_USES);
    let has_save = has(SAVE_TOOL_USE);
    let has_text = has(SAVE_TEXT_MEMORY);

    if !(has_search || has_save || has_text) {
        return String::new();
    }

    let rule = "=".repeat(60);
    let sub_rule = "-".repeat(50);
    let mut parts: Vec<String> = vec![rule.clone(), "MEMORY SYSTEM:".into(), rule];

    if has_search || has_save {
        parts.push("\n1. TOOL USAGE MEMORY (Structured Workflow):".into());
        parts.push(sub_rule.clone());
    }

    if has_search {
        parts.push(format!(
            "\n• BEFORE executing any tool (run_sql, visualize_data, or calculator), you MUST first call \
             {SEARCH_TOOL_USES} with the user's question to check if there are existing successful \
             patterns for similar questions."
        ));
        parts.push(
            "\n• Review the search results (if any) to inform your approach before proceeding with \
             other tool calls."
                .into(),
        );
    }

    if has_save {
        parts.push(format!(
            "\n• AFTER successfully executing a tool that produces correct and useful results, you MUST \
             call {SAVE_TOOL_USE} to save the successful pattern for future use."
        ));
    }

    if has_search || has_save {
        parts.push("\nExample workflow:".into());
        parts.push("  • User asks a question".into());
        if has_search {
            parts.push(format!("  • First: Call {SEARCH_TOOL_USES}(question=\"user's question\")"));
        }
        parts.push("  • Then: Execute the appropriate tool(s) based on search results and the question".into());
        if has_save {
            parts.push(format!(
                "  • Finally: If successful, call {SAVE_TOOL_USE}(question=\"user's question\", \
                 tool_name=\"tool_used\", args={{the args you used}})"
            ));
        }
        if has_search {
            parts.push(
                "\nDo NOT skip the search step, even if you think you know how to answer. \
                 Do NOT forget to save successful executions."
                    .into(),
            );
        }
        parts.push("\nThe only exceptions to searching first are:".into());
        parts.push("  • When the user is explicitly asking about the tools themselves (like \"list the tools\")".into());
        parts.push(
            "  • When the user is testing or asking you to demonstrate the save/search functionality itself".into(),
        );
    }

    if has_text {
        parts.push("\n2. TEXT MEMORY (Domain Knowledge & Context):".into());
        parts.push(sub_rule);
        parts.push(format!(
            "\n• {SAVE_TEXT_MEMORY}: Save important context about the database, schema, or domain"
        ));
        parts.push("\nUse text memory to save:".into());
        parts.extend(
            [
                "  • Database schema details (column meanings, data types, relationships)",
                "  • Company-specific terminology and definitions",
                "  • Query patterns or best practices for this database",
                "  • Domain knowledge about the business or data",
                "  • User preferences for queries or visualizations",
                "\nDO NOT save:",
                "  • Information already captured in tool usage memory",
                "  • One-time query results or temporary observations",
                "\nExamples:",
                "  • save_text_memory(content=\"The status column uses 1 for active, 0 for inactive\")",
                "  • save_text_memory(content=\"MRR means Monthly Recurring Revenue in our schema\")",
                "  • save_text_memory(content=\"Always exclude test accounts where email contains 'test'\")",
            ]
            .map(String::from),
        );
    }

    parts.join("\n")
}

// ── Default builder ───────────────────────────────────────────────────────

/// A data-analyst prompt with today's date, the visible tools, and memory
/// instructions. A fixed base prompt, when set, is returned unchanged.
#[derive(Debug, Clone, Default)]
pub struct DefaultSystemPromptBuilder {
    base_prompt: Option<String>,
}

impl DefaultSystemPromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_prompt(base_prompt: impl Into<String>) -> Self {
        Self {
            base_prompt: Some(base_prompt.into()),
        }
    }
}

#[async_trait]
impl SystemPromptBuilder for DefaultSystemPromptBuilder {
    async fn build_system_prompt(&self, _user: &User, tools: &[ToolSchema]) -> Result<Option<String>, HookError> {
        if let Some(base) = &self.base_prompt {
            return Ok(Some(base.clone()));
        }

        let today = Local::now().format("%Y-%m-%d");
        let mut parts = vec![
            format!(
                "You are Cairn, an AI data analyst assistant created to help users with data analysis \
                 tasks. Today's date is {today}."
            ),
            String::new(),
            "Response Guidelines:".into(),
            "- Any summary of what you did or observations should be the final step.".into(),
            "- Use the available tools to help the user accomplish their goals.".into(),
            "- When you execute a query, that raw result is shown to the user outside of your response \
             so YOU DO NOT need to include it in your response. Focus on summarizing and interpreting \
             the results."
                .into(),
        ];

        if !tools.is_empty() {
            let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
            parts.push(format!("\nYou have access to the following tools: {}", names.join(", ")));
        }

        let memory = memory_workflow_instructions(tools);
        if !memory.is_empty() {
            parts.push(format!("\n{memory}"));
        }

        Ok(Some(parts.join("\n")))
    }
}

// ── Domain builder ────────────────────────────────────────────────────────

/// A base prompt extended with database facts and business rules.
#[derive(Debug, Clone, Default)]
pub struct DomainPromptBuilder {
    base_prompt: String,
    database_type: Option<String>,
    database_purpose: Option<String>,
    /// Kept in insertion order so the prompt is stable.
    business_definitions: Vec<(String, String)>,
    sql_patterns: Vec<String>,
    performance_hints: Vec<String>,
    data_quality_notes: Vec<String>,
    additional_context: Option<String>,
}

impl DomainPromptBuilder {
    pub fn new(base_prompt: impl Into<String>) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_database_type(mut self, database_type: impl Into<String>) -> Self {
        self.database_type = Some(database_type.into());
        self
    }

    pub fn with_database_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.database_purpose = Some(purpose.into());
        self
    }

    pub fn with_business_definition(mut self, term: impl Into<String>, definition: impl Into<String>) -> Self {
        self.business_definitions.push((term.into(), definition.into()));
        self
    }

    pub fn with_sql_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sql_patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_performance_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.performance_hints.extend(hints.into_iter().map(Into::into));
        self
    }

    pub fn with_data_quality_notes<I, S>(mut self, notes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_quality_notes.extend(notes.into_iter().map(Into::into));
        self
    }

    pub fn with_additional_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }

    fn list_section(header: &str, intro: &str, items: &[String], numbered: bool) -> String {
        let mut section = format!("{header}\n{intro}\n");
        for (i, item) in items.iter().enumerate() {
            if numbered {
                section.push_str(&format!("\n{}. {item}", i + 1));
            } else {
                section.push_str(&format!("\n{item}"));
            }
        }
        section
    }

    /// Assemble the prompt for the given visible tools.
    pub fn render(&self, tools: &[ToolSchema]) -> String {
        let mut sections = vec![self.base_prompt.clone()];

        if self.database_type.is_some() || self.database_purpose.is_some() {
            let mut info = String::from("DATABASE INFORMATION:");
            if let Some(kind) = &self.database_type {
                info.push_str(&format!("\n- Database Type: {kind}"));
            }
            if let Some(purpose) = &self.database_purpose {
                info.push_str(&format!("\n- Purpose: {purpose}"));
            }
            sections.push(info);
        }

        if !self.business_definitions.is_empty() {
            let lines: Vec<String> = self
                .business_definitions
                .iter()
                .map(|(term, definition)| format!("- **{term}**: {definition}"))
                .collect();
            sections.push(Self::list_section(
                "BUSINESS DEFINITIONS:",
                "When users ask about these business concepts, use these definitions:",
                &lines,
                false,
            ));
        }

        if !self.sql_patterns.is_empty() {
            sections.push(Self::list_section(
                "SQL BEST PRACTICES FOR THIS DATABASE:",
                "Always follow these patterns when generating SQL:",
                &self.sql_patterns,
                true,
            ));
        }

        if !self.performance_hints.is_empty() {
            sections.push(Self::list_section(
                "PERFORMANCE CONSIDERATIONS:",
                "Be aware of these performance characteristics:",
                &self.performance_hints,
                true,
            ));
        }

        if !self.data_quality_notes.is_empty() {
            sections.push(Self::list_section(
                "DATA QUALITY NOTES:",
                "Be aware of these data quality issues:",
                &self.data_quality_notes,
                true,
            ));
        }

        let memory = memory_workflow_instructions(tools);
        if !memory.is_empty() {
            sections.push(memory);
        }

        if let Some(extra) = &self.additional_context {
            sections.push(extra.clone());
        }

        sections.join("\n\n")
    }
}

#[async_trait]
impl SystemPromptBuilder for DomainPromptBuilder {
    async fn build_system_prompt(&self, _user: &User, tools: &[ToolSchema]) -> Result<Option<String>, HookError> {
        Ok(Some(self.render(tools)))
    }
}
