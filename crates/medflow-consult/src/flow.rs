//! Graph wiring and the public entry points for one consultation turn.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use medflow_core::config::AppConfig;
use medflow_core::error::Result;
use medflow_core::traits::{LanguageModel, SearchIndex, UserMemory};
use medflow_core::types::{Answer, ConversationTurn, Role};
use medflow_engine::{Graph, RetryPolicy, RunReport, Runner};

use crate::memory_flow::{self, MemoryState, MutationOutcome};
use crate::nodes::{
    actions, names, ClarifyQuestion, ClassifyQuery, ComposeAnswer, DirectFallback,
    FilterCandidates, RagOrchestrator, RetrieveCandidates, RewriteQuery,
};
use crate::prompts;
use crate::state::ConsultState;

/// The external services a consultation runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LanguageModel>,
    pub search: Arc<dyn SearchIndex>,
    pub memory: Arc<dyn UserMemory>,
}

/// One user turn as received from the caller.
#[derive(Debug, Clone)]
pub struct ConsultRequest {
    pub user: String,
    pub role: Role,
    pub query: String,
    pub history: Vec<ConversationTurn>,
    /// Optional category hint narrowing the first search pass.
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl ConsultRequest {
    pub fn new(user: impl Into<String>, role: Role, query: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            role,
            query: query.into(),
            history: Vec::new(),
            category: None,
            subcategory: None,
        }
    }
}

/// Result of the consultation graph alone.
pub struct ConsultOutcome {
    pub answer: Answer,
    pub state: ConsultState,
    pub report: RunReport,
}

/// Result of a full turn: the answer plus what memory maintenance did.
pub struct TurnOutcome {
    pub answer: Answer,
    pub report: RunReport,
    /// `None` when maintenance was skipped or failed outright.
    pub memory: Option<MutationOutcome>,
}

/// Assemble the consultation graph.
///
/// Terminal nodes (compose, clarify, fallback, and classify's direct
/// response) simply have no outgoing edge for their final action.
pub fn consult_graph(
    collab: &Collaborators,
    config: &AppConfig,
) -> Result<Graph<ConsultState>> {
    let retry = RetryPolicy::from_config(&config.llm.retry);
    let pipeline = &config.pipeline;

    Graph::builder()
        .step(ClassifyQuery::new(collab.llm.clone(), retry))
        .step(RagOrchestrator::new(
            collab.llm.clone(),
            pipeline.retrieve_attempt_cap,
            retry,
        ))
        .step(RewriteQuery::new(collab.llm.clone(), retry))
        .step(RetrieveCandidates::new(
            collab.search.clone(),
            pipeline.top_k,
            retry,
        ))
        .step(FilterCandidates::new(
            collab.llm.clone(),
            pipeline.min_candidates_to_filter,
            pipeline.max_selected,
            retry,
        ))
        .step(ComposeAnswer::new(
            collab.llm.clone(),
            collab.search.clone(),
            pipeline.followup_cap,
            retry,
        ))
        .step(ClarifyQuestion::new(
            collab.search.clone(),
            pipeline.followup_cap,
        ))
        .step(DirectFallback::new(
            collab.search.clone(),
            pipeline.followup_cap,
        ))
        .start(names::CLASSIFY)
        .edge(names::CLASSIFY, actions::RETRIEVE_KB, names::ORCHESTRATE)
        .edge(names::CLASSIFY, medflow_engine::Action::FALLBACK, names::FALLBACK)
        .edge(names::ORCHESTRATE, actions::CREATE_RETRIEVAL_QUERY, names::REWRITE)
        .edge(names::ORCHESTRATE, actions::RETRIEVE_KB, names::RETRIEVE)
        .edge(names::ORCHESTRATE, actions::COMPOSE_ANSWER, names::COMPOSE)
        .edge(names::ORCHESTRATE, actions::CLARIFY, names::CLARIFY)
        .edge(
            names::ORCHESTRATE,
            medflow_engine::Action::FALLBACK,
            names::FALLBACK,
        )
        .then(names::REWRITE, names::ORCHESTRATE)
        .edge(names::REWRITE, medflow_engine::Action::FALLBACK, names::FALLBACK)
        .then(names::RETRIEVE, names::FILTER)
        .then(names::FILTER, names::ORCHESTRATE)
        .edge(names::FILTER, medflow_engine::Action::FALLBACK, names::FALLBACK)
        .edge(names::COMPOSE, medflow_engine::Action::FALLBACK, names::FALLBACK)
        .build()
}

/// Run the consultation graph for one request.
///
/// The relevant-memory snapshot is loaded up front; failures there degrade
/// to an empty snapshot rather than blocking the consultation.
pub async fn run_consultation(
    collab: &Collaborators,
    config: &AppConfig,
    request: ConsultRequest,
) -> Result<ConsultOutcome> {
    let graph = consult_graph(collab, config)?;

    let mut state = ConsultState::new(request.role, request.query);
    state.history = request.history;
    state.category = request.category;
    state.subcategory = request.subcategory;
    state.memories = match collab
        .memory
        .relevant(&request.user, &state.query, config.memory.relevant_top_n)
        .await
    {
        Ok(memories) => memories,
        Err(e) => {
            warn!(error = %e, "memory lookup failed, consulting without it");
            Vec::new()
        }
    };

    let runner = Runner::new(config.engine.max_steps);
    let timeout = Duration::from_secs(config.engine.run_timeout_secs);
    let report = runner.run_with_timeout(&graph, &mut state, timeout).await?;

    let answer = state
        .answer
        .clone()
        .unwrap_or_else(|| Answer::plain(prompts::GENERIC_ANSWER));
    Ok(ConsultOutcome {
        answer,
        state,
        report,
    })
}

/// Run one full turn: consultation, then best-effort memory maintenance.
///
/// Maintenance failures never fail the turn — the user already has their
/// answer by the time it runs.
pub async fn run_turn(
    collab: &Collaborators,
    config: &AppConfig,
    request: ConsultRequest,
) -> Result<TurnOutcome> {
    let user = request.user.clone();
    let outcome = run_consultation(collab, config, request).await?;

    let retry = RetryPolicy::from_config(&config.llm.retry);
    let memory = match memory_flow::memory_graph(collab.llm.clone(), collab.memory.clone(), retry)
    {
        Ok(graph) => {
            // The planner reasons over what the user actually typed, not the
            // clarified rewrite.
            let verbatim = outcome
                .state
                .original_query
                .clone()
                .unwrap_or_else(|| outcome.state.query.clone());
            let mut mem_state = MemoryState::new(
                user,
                outcome.state.role,
                verbatim,
                outcome.state.context_summary.clone(),
                outcome.answer.explanation.clone(),
                outcome.state.memories.clone(),
            );
            let runner = Runner::new(config.engine.max_steps);
            match runner.run(&graph, &mut mem_state).await {
                // A skipped plan never reaches the mutation nodes.
                Ok(_) if mem_state.plan.is_none() => None,
                Ok(_) => Some(mem_state.outcome),
                Err(e) => {
                    warn!(error = %e, "memory maintenance failed");
                    None
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "memory graph assembly failed");
            None
        }
    };

    Ok(TurnOutcome {
        answer: outcome.answer,
        report: outcome.report,
        memory,
    })
}
