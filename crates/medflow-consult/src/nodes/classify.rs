use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use medflow_core::error::Result;
use medflow_core::traits::LanguageModel;
use medflow_core::types::Answer;
use medflow_engine::{Action, RetryPolicy, Step};

use crate::nodes::actions;
use crate::parse::{self, ClassifyDecision, QueryKind};
use crate::prompts;
use crate::state::ConsultState;

/// Entry node: decides whether the query deserves a direct conversational
/// reply or a knowledge-base consultation.
///
/// When routing to retrieval it also snapshots a context summary for the
/// downstream nodes (they never see the raw history) and may substitute a
/// clarified query, keeping the verbatim one in `original_query`.
pub struct ClassifyQuery {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl ClassifyQuery {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }
}

impl Step<ConsultState> for ClassifyQuery {
    type Input = String;
    type Output = String;

    fn name(&self) -> &str {
        super::names::CLASSIFY
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &ConsultState) -> Result<Self::Input> {
        Ok(prompts::classify(
            &state.query,
            state.role,
            &state.formatted_history(),
        ))
    }

    fn compute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>> {
        self.llm.complete(input, true)
    }

    fn commit(
        &self,
        state: &mut ConsultState,
        _input: Self::Input,
        outcome: Result<Self::Output>,
    ) -> Result<Action> {
        let text = match outcome {
            Ok(text) => text,
            Err(e) if e.is_overload() => {
                warn!(node = self.name(), "model overloaded, taking fallback");
                return Ok(Action::FALLBACK);
            }
            Err(e) => {
                warn!(node = self.name(), error = %e, "classification failed, answering directly");
                state.answer = Some(Answer::plain(prompts::GENERIC_ANSWER));
                return Ok(actions::DIRECT_RESPONSE);
            }
        };

        match parse::parse_response::<ClassifyDecision>(&text) {
            Ok(decision) => match decision.kind {
                QueryKind::DirectResponse => {
                    info!(node = self.name(), "direct response");
                    let reply = if decision.explanation.is_empty() {
                        prompts::GENERIC_ANSWER.to_string()
                    } else {
                        decision.explanation
                    };
                    state.answer = Some(Answer::plain(reply));
                    Ok(actions::DIRECT_RESPONSE)
                }
                QueryKind::RetrieveKb => {
                    state.context_summary = decision.context_summary;
                    if !decision.new_query.trim().is_empty() {
                        state.original_query = Some(std::mem::replace(
                            &mut state.query,
                            decision.new_query,
                        ));
                    }
                    info!(node = self.name(), query = %state.query, "routing to retrieval");
                    Ok(actions::RETRIEVE_KB)
                }
            },
            Err(e) => {
                warn!(node = self.name(), error = %e, "unparseable classification");
                state.answer = Some(Answer::plain(prompts::GENERIC_ANSWER));
                Ok(actions::DIRECT_RESPONSE)
            }
        }
    }
}
