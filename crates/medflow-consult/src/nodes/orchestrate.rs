use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use medflow_core::error::Result;
use medflow_core::traits::LanguageModel;
use medflow_engine::{Action, RetryPolicy, Step};

use crate::nodes::actions;
use crate::parse::{self, NextDecision, NextMove};
use crate::prompts;
use crate::state::{ConsultState, Stage};

/// What the orchestrator decided to do while gathering.
pub enum OrchestrateInput {
    /// The decision follows from the stage alone; no model involved.
    Fixed(Action),
    /// Filtered material exists, ask the model whether it is enough.
    Consult { prompt: String },
}

/// Hub of the retrieval loop. Routes by pipeline stage:
///
/// - `init` without a rewritten query goes to the rewrite node, with one
///   (rewriting happens at most once) to retrieval;
/// - `filtered` with an empty selection retries retrieval while passes
///   remain, then gives up and asks the user to clarify;
/// - `filtered` with material consults the model on whether to retry or
///   compose — the attempt cap overrules a retry verdict.
pub struct RagOrchestrator {
    llm: Arc<dyn LanguageModel>,
    attempt_cap: u32,
    retry: RetryPolicy,
}

impl RagOrchestrator {
    pub fn new(llm: Arc<dyn LanguageModel>, attempt_cap: u32, retry: RetryPolicy) -> Self {
        Self {
            llm,
            attempt_cap,
            retry,
        }
    }
}

impl Step<ConsultState> for RagOrchestrator {
    type Input = OrchestrateInput;
    type Output = Option<String>;

    fn name(&self) -> &str {
        super::names::ORCHESTRATE
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &ConsultState) -> Result<Self::Input> {
        let fixed = match state.stage {
            Stage::Init if !state.query_rewritten => actions::CREATE_RETRIEVAL_QUERY,
            Stage::Init | Stage::Retrieved => actions::RETRIEVE_KB,
            Stage::Filtered if state.selected_ids.is_empty() => {
                if state.retrieve_attempts < self.attempt_cap {
                    actions::RETRIEVE_KB
                } else {
                    actions::CLARIFY
                }
            }
            Stage::Filtered => {
                return Ok(OrchestrateInput::Consult {
                    prompt: prompts::next_action(
                        state.search_query(),
                        &state.selected_questions(),
                        state.retrieve_attempts,
                        self.attempt_cap,
                    ),
                });
            }
            // Compose, clarify, and fallback are terminal, so no edge re-enters
            // the orchestrator at this stage. The arm exists only to keep the
            // match exhaustive; route to compose if the wiring ever changes.
            Stage::Composing => actions::COMPOSE_ANSWER,
        };
        Ok(OrchestrateInput::Fixed(fixed))
    }

    fn compute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>> {
        match input {
            OrchestrateInput::Fixed(_) => Box::pin(async { Ok(None) }),
            OrchestrateInput::Consult { prompt } => {
                let fut = self.llm.complete(prompt, true);
                Box::pin(async move { fut.await.map(Some) })
            }
        }
    }

    fn commit(
        &self,
        state: &mut ConsultState,
        input: Self::Input,
        outcome: Result<Self::Output>,
    ) -> Result<Action> {
        let action = match (input, outcome) {
            (OrchestrateInput::Fixed(action), _) => action,
            (OrchestrateInput::Consult { .. }, Ok(Some(text))) => {
                match parse::parse_response::<NextDecision>(&text) {
                    Ok(NextDecision {
                        next_action: NextMove::RetryRetrieve,
                        reason,
                    }) if state.retrieve_attempts < self.attempt_cap => {
                        info!(node = self.name(), %reason, "model asked for another pass");
                        actions::RETRIEVE_KB
                    }
                    Ok(decision) => {
                        info!(node = self.name(), decision = ?decision.next_action, "composing");
                        actions::COMPOSE_ANSWER
                    }
                    Err(e) => {
                        warn!(node = self.name(), error = %e, "unparseable verdict, composing");
                        actions::COMPOSE_ANSWER
                    }
                }
            }
            (OrchestrateInput::Consult { .. }, Ok(None)) => actions::COMPOSE_ANSWER,
            (OrchestrateInput::Consult { .. }, Err(e)) if e.is_overload() => {
                warn!(node = self.name(), "model overloaded, taking fallback");
                return Ok(Action::FALLBACK);
            }
            (OrchestrateInput::Consult { .. }, Err(e)) => {
                // The material is already filtered; compose from what we have.
                warn!(node = self.name(), error = %e, "verdict failed, composing anyway");
                actions::COMPOSE_ANSWER
            }
        };

        if action == actions::RETRIEVE_KB && state.stage == Stage::Filtered {
            // Fresh pass: retrieval repopulates candidates from scratch.
            state.stage = Stage::Init;
        }
        info!(node = self.name(), stage = %state.stage, action = %action, "routing");
        Ok(action)
    }
}
