//! Consultation pipeline nodes.
//!
//! Each node implements the engine's three-phase step contract over
//! [`ConsultState`](crate::state::ConsultState) and is grounded against an
//! external collaborator, absorbing its failures into routing decisions.

pub mod classify;
pub mod clarify;
pub mod compose;
pub mod fallback;
pub mod filter;
pub mod orchestrate;
pub mod retrieve;
pub mod rewrite;

pub use classify::ClassifyQuery;
pub use clarify::ClarifyQuestion;
pub use compose::ComposeAnswer;
pub use fallback::DirectFallback;
pub use filter::FilterCandidates;
pub use orchestrate::RagOrchestrator;
pub use retrieve::RetrieveCandidates;
pub use rewrite::RewriteQuery;

/// Node names, used both for registration and edge wiring.
pub mod names {
    pub const CLASSIFY: &str = "classify";
    pub const ORCHESTRATE: &str = "orchestrate";
    pub const REWRITE: &str = "rewrite_query";
    pub const RETRIEVE: &str = "retrieve";
    pub const FILTER: &str = "filter";
    pub const COMPOSE: &str = "compose";
    pub const CLARIFY: &str = "clarify";
    pub const FALLBACK: &str = "fallback";
}

/// Action labels beyond the engine's built-in `default`/`fallback`.
pub mod actions {
    use medflow_engine::Action;

    pub const DIRECT_RESPONSE: Action = Action::from_static("direct_response");
    pub const RETRIEVE_KB: Action = Action::from_static("retrieve_kb");
    pub const CREATE_RETRIEVAL_QUERY: Action = Action::from_static("create_retrieval_query");
    pub const COMPOSE_ANSWER: Action = Action::from_static("compose_answer");
    pub const CLARIFY: Action = Action::from_static("clarify");
}
