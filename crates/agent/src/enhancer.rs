//! Enhancers that inject similar past queries from agent memory into the
//! system prompt.

use async_trait::async_trait;
use cairn_core::context::RequestEnvelope;
use cairn_core::error::{HookError, MemoryError};
use cairn_core::extension::LlmContextEnhancer;
use cairn_core::memory::ToolMemorySearchResult;
use cairn_tools::sql::RUN_SQL;
use tracing::{debug, info, warn};

/// Appends a "RELEVANT PAST QUERIES" block built from saved tool usages.
#[derive(Debug, Clone)]
pub struct MemoryBasedEnhancer {
    max_examples: usize,
    similarity_threshold: f32,
    tool_filter: Option<String>,
    include_metadata: bool,
    /// Custom per-example template with `{question}`, `{sql}`, `{similarity}`.
    example_format: Option<String>,
}

impl Default for MemoryBasedEnhancer {
    fn default() -> Self {
        Self {
            max_examples: 5,
            similarity_threshold: 0.7,
            tool_filter: Some(RUN_SQL.to_string()),
            include_metadata: false,
            example_format: None,
        }
    }
}

impl MemoryBasedEnhancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_examples(mut self, max: usize) -> Self {
        self.max_examples = max;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Search usages of any tool, or only of `tool`.
    pub fn with_tool_filter(mut self, tool: Option<String>) -> Self {
        self.tool_filter = tool;
        self
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn with_example_format(mut self, template: impl Into<String>) -> Self {
        self.example_format = Some(template.into());
        self
    }

    async fn search(
        &self,
        question: &str,
        envelope: &RequestEnvelope,
        threshold: f32,
    ) -> Result<Vec<ToolMemorySearchResult>, MemoryError> {
        envelope
            .memory
            .search_similar_usage(question, self.max_examples, threshold, self.tool_filter.as_deref())
            .await
    }

    fn format_examples(&self, hits: &[ToolMemorySearchResult]) -> String {
        let examples: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let sql = hit.memory.args["sql"].as_str().unwrap_or_default().trim();
                if let Some(template) = &self.example_format {
                    return template
                        .replace("{question}", &hit.memory.question)
                        .replace("{sql}", sql)
                        .replace("{similarity}", &format!("{:.2}", hit.similarity_score));
                }
                let mut example = format!(
                    "Example {}:\nQuestion: {}\nSQL:\n```sql\n{sql}\n```",
                    i + 1,
                    hit.memory.question
                );
                if self.include_metadata {
                    example.push_str(&format!("\n(Saved: {})", hit.memory.timestamp.to_rfc3339()));
                    if let Some(category) = hit.memory.metadata.get("category").and_then(|c| c.as_str()) {
                        example.push_str(&format!("\n(Category: {category})"));
                    }
                }
                example
            })
            .collect();
        examples.join("\n\n")
    }

    fn inject(system_prompt: String, examples: &str, count: usize) -> String {
        let divider = "=".repeat(70);
        format!(
            "{system_prompt}\n\n{divider}\nRELEVANT PAST QUERIES ({count} example(s)):\n\n\
             The following are similar questions and their correct SQL queries from past successful \
             executions. Use these as reference patterns when generating SQL for the current question.\n\n\
             {examples}\n{divider}\n"
        )
    }

    fn enhance_with(
        &self,
        system_prompt: String,
        question: &str,
        hits: Result<Vec<ToolMemorySearchResult>, MemoryError>,
    ) -> String {
        let hits = match hits {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Memory search failed: {e}");
                return system_prompt;
            }
        };
        if hits.is_empty() {
            debug!(question, "No similar queries found");
            return system_prompt;
        }
        info!(examples = hits.len(), "Enhanced system prompt with past queries");
        let examples = self.format_examples(&hits);
        Self::inject(system_prompt, &examples, hits.len())
    }
}

#[async_trait]
impl LlmContextEnhancer for MemoryBasedEnhancer {
    fn name(&self) -> &str {
        "memory_based_enhancer"
    }

    async fn enhance_system_prompt(
        &self,
        system_prompt: String,
        user_message: &str,
        envelope: &RequestEnvelope,
    ) -> Result<String, HookError> {
        if user_message.trim().is_empty() {
            return Ok(system_prompt);
        }
        let hits = self.search(user_message, envelope, self.similarity_threshold).await;
        Ok(self.enhance_with(system_prompt, user_message, hits))
    }
}

/// Lowers the similarity threshold step by step until enough examples turn up.
#[derive(Debug, Clone)]
pub struct AdaptiveMemoryEnhancer {
    inner: MemoryBasedEnhancer,
    initial_threshold: f32,
    min_threshold: f32,
    threshold_step: f32,
    min_examples: usize,
}

impl Default for AdaptiveMemoryEnhancer {
    fn default() -> Self {
        Self {
            inner: MemoryBasedEnhancer::default(),
            initial_threshold: 0.7,
            min_threshold: 0.3,
            threshold_step: 0.1,
            min_examples: 1,
        }
    }
}

impl AdaptiveMemoryEnhancer {
    pub fn new(inner: MemoryBasedEnhancer) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn with_thresholds(mut self, initial: f32, min: f32, step: f32) -> Self {
        self.initial_threshold = initial;
        self.min_threshold = min;
        self.threshold_step = step.max(0.01);
        self
    }

    pub fn with_min_examples(mut self, min_examples: usize) -> Self {
        self.min_examples = min_examples;
        self
    }

    async fn adaptive_search(
        &self,
        question: &str,
        envelope: &RequestEnvelope,
    ) -> Result<Vec<ToolMemorySearchResult>, MemoryError> {
        let mut threshold = self.initial_threshold;
        let mut hits = Vec::new();
        // Small epsilon so 0.7 - 4 * 0.1 still reaches a 0.3 floor.
        while threshold >= self.min_threshold - 1e-4 {
            hits = self.inner.search(question, envelope, threshold).await?;
            if hits.len() >= self.min_examples {
                if threshold < self.initial_threshold {
                    info!(threshold, found = hits.len(), "Adaptive search lowered threshold");
                }
                return Ok(hits);
            }
            threshold -= self.threshold_step;
        }
        debug!(min_threshold = self.min_threshold, found = hits.len(), "Adaptive search exhausted");
        Ok(hits)
    }
}

#[async_trait]
impl LlmContextEnhancer for AdaptiveMemoryEnhancer {
    fn name(&self) -> &str {
        "adaptive_memory_enhancer"
    }

    async fn enhance_system_prompt(
        &self,
        system_prompt: String,
        user_message: &str,
        envelope: &RequestEnvelope,
    ) -> Result<String, HookError> {
        if user_message.trim().is_empty() {
            return Ok(system_prompt);
        }
        let hits = self.adaptive_search(user_message, envelope).await;
        Ok(self.inner.enhance_with(system_prompt, user_message, hits))
    }
}
