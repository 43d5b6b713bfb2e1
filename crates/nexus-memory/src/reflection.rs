//! Reflection: synthesizing insights once enough has happened.
//!
//! A reflection is due when the importance of the memories created since
//! the previous reflection (at most the configured window, newest first)
//! sums to more than the threshold. The model sees those memories as
//! numbered statements and answers with insights citing statement numbers;
//! [`resolve_insights`] turns the citations back into memory ids.

use nexus_types::{Memory, MemoryId};
use serde::Deserialize;

/// Total importance of a set of memories.
pub fn importance_sum(memories: &[Memory]) -> f64 {
    memories.iter().map(|m| m.importance).sum()
}

/// Whether the given memories warrant a reflection.
pub fn reflection_due(memories: &[Memory], threshold: f64) -> bool {
    importance_sum(memories) > threshold
}

/// Numbered statements shown to the model, one per memory.
pub fn numbered_statements(memories: &[Memory]) -> Vec<String> {
    memories
        .iter()
        .enumerate()
        .map(|(i, m)| format!("Statement {i}: {}", m.description))
        .collect()
}

/// One insight as returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Insight {
    /// The insight text.
    pub insight: String,
    /// Zero-based statement numbers supporting the insight.
    #[serde(rename = "statementIds", alias = "statement_ids", default)]
    pub statement_ids: Vec<usize>,
}

/// An insight with its citations resolved to memory ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInsight {
    /// The insight text.
    pub text: String,
    /// Memories the insight cites.
    pub related_memory_ids: Vec<MemoryId>,
}

/// Resolve statement citations against the statements shown to the model.
///
/// Citations outside the statement list are dropped; blank insights are
/// skipped.
pub fn resolve_insights(insights: Vec<Insight>, statements: &[Memory]) -> Vec<ResolvedInsight> {
    insights
        .into_iter()
        .filter(|i| !i.insight.trim().is_empty())
        .map(|i| {
            let mut related_memory_ids: Vec<MemoryId> = i
                .statement_ids
                .iter()
                .filter_map(|idx| statements.get(*idx).map(|m| m.id))
                .collect();
            related_memory_ids.dedup();
            ResolvedInsight {
                text: i.insight.trim().to_owned(),
                related_memory_ids,
            }
        })
        .collect()
}
