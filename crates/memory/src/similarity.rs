//! Text similarity and ranking utilities.
//!
//! Pure-Rust, dependency-free:
//! - Cosine similarity over dense vectors
//! - Bag-of-words term vectors and sparse cosine similarity for free text
//! - Ranking helpers shared by every agent memory backend

use cairn_core::memory::{TextMemory, TextMemorySearchResult, ToolMemory, ToolMemorySearchResult};
use std::collections::HashMap;

/// Words too common to say anything about a question.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it",
    "me", "of", "on", "or", "show", "the", "to", "was", "what", "which", "with",
];

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |(d, na, nb), (x, y)| {
        let (x, y) = (*x as f64, *y as f64);
        (d + x * y, na + x * x, nb + y * y)
    });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

/// Lower-cased alphanumeric tokens, stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Term-frequency vector of a text.
pub fn term_vector(text: &str) -> HashMap<String, f32> {
    let mut tf = HashMap::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of two term vectors, in [0, 1].
pub fn sparse_cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| (*w as f64) * (*v as f64)))
        .sum();
    let norm = |v: &HashMap<String, f32>| v.values().map(|w| (*w as f64).powi(2)).sum::<f64>().sqrt();
    let denom = norm(a) * norm(b);
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

/// Similarity of two free-text strings, in [0, 1].
pub fn text_similarity(a: &str, b: &str) -> f32 {
    sparse_cosine(&term_vector(a), &term_vector(b))
}

/// Keep the `limit` highest-scoring items at or above `threshold`.
///
/// Ties keep their input order, so newer-first inputs stay newer-first.
fn top_k<T: Clone>(items: &[T], score: impl Fn(&T) -> f32, limit: usize, threshold: f32) -> Vec<(T, f32)> {
    let mut scored: Vec<(T, f32)> = items
        .iter()
        .map(|item| (item.clone(), score(item)))
        .filter(|(_, s)| *s >= threshold && *s > 0.0)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Rank tool memories by question similarity.
pub fn rank_tool_memories(
    memories: &[ToolMemory],
    question: &str,
    limit: usize,
    threshold: f32,
    tool_name_filter: Option<&str>,
) -> Vec<ToolMemorySearchResult> {
    let query = term_vector(question);
    let candidates: Vec<ToolMemory> = memories
        .iter()
        .filter(|m| m.success)
        .filter(|m| tool_name_filter.is_none_or(|name| m.tool_name == name))
        .cloned()
        .collect();
    top_k(&candidates, |m| sparse_cosine(&query, &term_vector(&m.question)), limit, threshold)
        .into_iter()
        .enumerate()
        .map(|(i, (memory, similarity_score))| ToolMemorySearchResult {
            memory,
            similarity_score,
            rank: i + 1,
        })
        .collect()
}

/// Rank text memories by content similarity.
pub fn rank_text_memories(
    memories: &[TextMemory],
    query: &str,
    limit: usize,
    threshold: f32,
) -> Vec<TextMemorySearchResult> {
    let query = term_vector(query);
    top_k(memories, |m| sparse_cosine(&query, &term_vector(&m.content)), limit, threshold)
        .into_iter()
        .enumerate()
        .map(|(i, (memory, similarity_score))| TextMemorySearchResult {
            memory,
            similarity_score,
            rank: i + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn tokenize_drops_stopwords_and_punctuation() {
        assert_eq!(
            tokenize("What is the total_revenue, by Region?"),
            vec!["total_revenue", "region"]
        );
    }

    #[test]
    fn text_similarity_bounds() {
        assert!((text_similarity("top customers by revenue", "revenue by top customers") - 1.0).abs() < 1e-6);
        assert_eq!(text_similarity("orders", "invoices"), 0.0);
        assert_eq!(text_similarity("", "orders"), 0.0);
        let partial = text_similarity("top customers by revenue", "top customers");
        assert!(partial > 0.5 && partial < 1.0);
    }

    #[test]
    fn rank_tool_memories_filters_and_orders() {
        let mut failed = ToolMemory::new("top customers by revenue", "run_sql", json!({"sql": "bad"}));
        failed.success = false;
        let memories = vec![
            ToolMemory::new("count orders last week", "run_sql", json!({"sql": "SELECT COUNT(*) FROM orders"})),
            ToolMemory::new("top customers by revenue", "run_sql", json!({"sql": "SELECT 1"})),
            ToolMemory::new("top customers by revenue", "plot", json!({})),
            failed,
        ];

        let results = rank_tool_memories(&memories, "top customers revenue", 5, 0.5, Some("run_sql"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.args["sql"], "SELECT 1");
        assert_eq!(results[0].rank, 1);

        let unfiltered = rank_tool_memories(&memories, "top customers revenue", 5, 0.5, None);
        assert_eq!(unfiltered.len(), 2);
    }

    #[test]
    fn rank_respects_limit() {
        let memories: Vec<TextMemory> = (0..5).map(|i| TextMemory::new(format!("revenue note {i}"))).collect();
        let results = rank_text_memories(&memories, "revenue", 2, 0.0);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].rank, 2);
    }
}
