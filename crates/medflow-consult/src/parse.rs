//! Parsing of constrained structured output from language-model text.
//!
//! Models are instructed to answer with a fenced JSON block. Parsing is
//! schema-driven: required fields and allowed value sets are enforced by the
//! serde types, and any failure is a local, recoverable
//! [`FlowError::MalformedOutput`] — never fatal to a run.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use medflow_core::error::{FlowError, Result};
use medflow_core::types::MemoryId;

/// Payload of the first fenced code block, or the whole text when no fence
/// is present (some models skip the fence).
pub fn extract_block(text: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|yaml)?\s*(.*?)```").expect("static regex")
    });
    match fence.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(text).trim(),
        None => text.trim(),
    }
}

/// Parse a model response into a schema type.
pub fn parse_response<T: DeserializeOwned>(text: &str) -> Result<T> {
    let block = extract_block(text);
    serde_json::from_str(block)
        .map_err(|e| FlowError::MalformedOutput(format!("{e}; payload: {:.120}", block)))
}

/// Classification outcome: answer directly or consult the knowledge base.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyDecision {
    #[serde(rename = "type")]
    pub kind: QueryKind,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub context_summary: String,
    #[serde(default)]
    pub new_query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    DirectResponse,
    RetrieveKb,
}

/// Retrieval-query rewrite.
#[derive(Debug, Clone, Deserialize)]
pub struct RewriteDecision {
    pub retrieval_query: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

/// Candidate selection by the filtering model.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterDecision {
    pub selected_ids: Vec<String>,
}

/// Orchestration decision after filtering.
#[derive(Debug, Clone, Deserialize)]
pub struct NextDecision {
    pub next_action: NextMove,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextMove {
    RetryRetrieve,
    ComposeAnswer,
}

/// Composed answer payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposedAnswer {
    pub explanation: String,
    #[serde(default)]
    pub suggestion_questions: Vec<String>,
}

/// Memory-mutation plan decided by the planner model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanDecision {
    #[serde(default)]
    pub insert_operations: Vec<InsertOp>,
    #[serde(default)]
    pub update_operations: Vec<UpdateOp>,
    #[serde(default)]
    pub delete_operations: Vec<DeleteOp>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub importance: Importance,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertOp {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateOp {
    pub memory_id: MemoryId,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteOp {
    pub memory_id: MemoryId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
}
