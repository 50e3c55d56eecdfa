use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use medflow_core::error::Result;
use medflow_core::traits::LanguageModel;
use medflow_engine::{Action, RetryPolicy, Step};

use crate::parse::{self, Confidence, RewriteDecision};
use crate::prompts;
use crate::state::ConsultState;

/// Rewrites the working query into a self-contained retrieval query.
///
/// The rewrite is an optimization, not a requirement: a malformed or empty
/// rewrite falls back to searching with the raw query. An overloaded backend
/// routes to the fallback leaf instead, since every later node needs the same
/// backend. `query_rewritten` is set on every continuing commit path so the
/// orchestrator never loops back into this node.
pub struct RewriteQuery {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl RewriteQuery {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }
}

impl Step<ConsultState> for RewriteQuery {
    type Input = String;
    type Output = String;

    fn name(&self) -> &str {
        super::names::REWRITE
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &ConsultState) -> Result<Self::Input> {
        Ok(prompts::rewrite_query(
            &state.query,
            state.role,
            &state.context_summary,
            state.category.as_deref(),
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
                warn!(node = self.name(), error = %e, "model overloaded, taking fallback");
                return Ok(Action::FALLBACK);
            }
            Err(e) => {
                warn!(node = self.name(), error = %e, "rewrite failed, searching with raw query");
                state.query_rewritten = true;
                return Ok(Action::DEFAULT);
            }
        };
        state.query_rewritten = true;

        match parse::parse_response::<RewriteDecision>(&text) {
            Ok(d) if !d.retrieval_query.trim().is_empty() => {
                info!(
                    node = self.name(),
                    retrieval_query = %d.retrieval_query,
                    confidence = ?d.confidence,
                    "query rewritten"
                );
                // A low-confidence rewrite may have drifted off-topic, so the
                // category hint from classification no longer applies.
                if d.confidence == Confidence::Low {
                    state.category = None;
                    state.subcategory = None;
                }
                state.retrieval_query = Some(d.retrieval_query);
            }
            Ok(_) => {
                warn!(node = self.name(), "empty rewrite, searching with raw query");
            }
            Err(e) => {
                warn!(node = self.name(), error = %e, "unparseable rewrite, searching with raw query");
            }
        }
        Ok(Action::DEFAULT)
    }
}
