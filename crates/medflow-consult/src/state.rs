use serde::{Deserialize, Serialize};

use medflow_core::types::{Answer, Candidate, ConversationTurn, MemoryEntry, Role, Speaker};

/// Where the retrieval/composition state machine currently stands.
///
/// Tracked in the run state, not in the runner: nodes read it to decide
/// routing, the runner only ever sees action labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Init,
    Retrieved,
    Filtered,
    Composing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Retrieved => "retrieved",
            Stage::Filtered => "filtered",
            Stage::Composing => "composing",
        };
        f.write_str(s)
    }
}

/// Shared state of one consultation run.
///
/// Created fresh per request and discarded after the runner returns. Every
/// node reads from and (in its commit phase only) writes to this struct; it
/// is the sole channel between nodes.
#[derive(Debug, Clone)]
pub struct ConsultState {
    pub role: Role,
    /// Current working query; may be replaced by a clarified rewrite.
    pub query: String,
    /// The user's verbatim query when `query` was rewritten.
    pub original_query: Option<String>,
    pub history: Vec<ConversationTurn>,
    /// Summary of prior turns produced during classification.
    pub context_summary: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub stage: Stage,
    /// Query optimized for the vector search, once rewritten.
    pub retrieval_query: Option<String>,
    /// Set once the rewrite node has run, successfully or not. Rewriting
    /// happens at most once per run.
    pub query_rewritten: bool,
    /// Completed retrieval passes. The orchestration retry loop is bounded
    /// by this counter, separate from any node-local retries.
    pub retrieve_attempts: u32,
    pub candidates: Vec<Candidate>,
    pub selected_ids: Vec<String>,
    pub answer: Option<Answer>,
    /// Prior-run memory snapshot: top relevant memories for this query.
    pub memories: Vec<MemoryEntry>,
}

impl ConsultState {
    pub fn new(role: Role, query: impl Into<String>) -> Self {
        Self {
            role,
            query: query.into(),
            original_query: None,
            history: Vec::new(),
            context_summary: String::new(),
            category: None,
            subcategory: None,
            stage: Stage::Init,
            retrieval_query: None,
            query_rewritten: false,
            retrieve_attempts: 0,
            candidates: Vec::new(),
            selected_ids: Vec::new(),
            answer: None,
            memories: Vec::new(),
        }
    }

    /// The query used for knowledge-base search: the rewrite when present,
    /// the raw query otherwise.
    pub fn search_query(&self) -> &str {
        self.retrieval_query.as_deref().unwrap_or(&self.query)
    }

    /// Conversation history rendered for prompts, oldest turn first.
    pub fn formatted_history(&self) -> String {
        self.history
            .iter()
            .map(|turn| {
                let who = match turn.speaker {
                    Speaker::User => "Người dùng",
                    Speaker::Assistant => "Trợ lý",
                };
                format!("{who}: {}", turn.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Questions of the currently selected candidates, in selection order.
    pub fn selected_questions(&self) -> Vec<String> {
        self.selected_ids
            .iter()
            .filter_map(|id| {
                self.candidates
                    .iter()
                    .find(|c| &c.id == id)
                    .map(|c| c.question.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query_prefers_rewrite() {
        let mut state = ConsultState::new(Role::PatientDental, "đau răng");
        assert_eq!(state.search_query(), "đau răng");

        state.retrieval_query = Some("đau răng khi ăn đồ lạnh".into());
        assert_eq!(state.search_query(), "đau răng khi ăn đồ lạnh");
    }

    #[test]
    fn test_formatted_history() {
        let mut state = ConsultState::new(Role::PatientDental, "còn đau");
        state.history = vec![
            ConversationTurn::user("tôi bị đau răng"),
            ConversationTurn::assistant("bạn đau bao lâu rồi?"),
        ];
        let rendered = state.formatted_history();
        assert!(rendered.starts_with("Người dùng: tôi bị đau răng"));
        assert!(rendered.contains("Trợ lý: bạn đau bao lâu rồi?"));
    }

    #[test]
    fn test_selected_questions_follow_selection_order() {
        let mut state = ConsultState::new(Role::PatientDental, "q");
        state.candidates = vec![
            Candidate {
                id: "a".into(),
                question: "A?".into(),
                score: 0.9,
            },
            Candidate {
                id: "b".into(),
                question: "B?".into(),
                score: 0.8,
            },
        ];
        state.selected_ids = vec!["b".into(), "a".into(), "ghost".into()];
        assert_eq!(state.selected_questions(), vec!["B?", "A?"]);
    }
}
