use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use medflow_core::error::Result;
use medflow_core::traits::{LanguageModel, SearchIndex};
use medflow_core::types::{Answer, Role};
use medflow_engine::{Action, RetryPolicy, Step};

use crate::parse::{self, ComposedAnswer};
use crate::prompts;
use crate::state::{ConsultState, Stage};

pub struct ComposeInput {
    ids: Vec<String>,
    query: String,
    role: Role,
    history: String,
}

/// Terminal node of the happy path: fetches the selected knowledge-base
/// entries and composes the grounded answer plus follow-up suggestions.
///
/// Uses the full model (not fast mode) since this is the user-visible text.
/// Unusable output degrades to a generic apology; overload takes the
/// fallback edge.
pub struct ComposeAnswer {
    llm: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchIndex>,
    followup_cap: usize,
    retry: RetryPolicy,
}

impl ComposeAnswer {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchIndex>,
        followup_cap: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            search,
            followup_cap,
            retry,
        }
    }
}

impl Step<ConsultState> for ComposeAnswer {
    type Input = ComposeInput;
    type Output = String;

    fn name(&self) -> &str {
        super::names::COMPOSE
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &ConsultState) -> Result<Self::Input> {
        Ok(ComposeInput {
            ids: state.selected_ids.clone(),
            query: state.query.clone(),
            role: state.role,
            history: state.formatted_history(),
        })
    }

    fn compute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let mut entries = self.search.fetch_by_ids(&input.ids).await?;
            // The store returns entries in arbitrary order; present them in
            // selection order.
            let position = |id: &str| input.ids.iter().position(|i| i == id);
            entries.sort_by_key(|e| position(&e.id).unwrap_or(usize::MAX));
            let prompt =
                prompts::compose_answer(&input.query, input.role, &entries, &input.history);
            self.llm.complete(&prompt, false).await
        })
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
                warn!(node = self.name(), error = %e, "composition failed");
                state.answer = Some(Answer::plain(prompts::GENERIC_ANSWER));
                state.stage = Stage::Composing;
                return Ok(Action::DEFAULT);
            }
        };

        let answer = match parse::parse_response::<ComposedAnswer>(&text) {
            Ok(composed) if !composed.explanation.trim().is_empty() => {
                let mut followups = composed.suggestion_questions;
                followups.retain(|q| !q.trim().is_empty());
                followups.truncate(self.followup_cap);
                info!(
                    node = self.name(),
                    followups = followups.len(),
                    "answer composed"
                );
                Answer {
                    explanation: composed.explanation,
                    followups,
                }
            }
            Ok(_) => {
                warn!(node = self.name(), "empty explanation");
                Answer::plain(prompts::GENERIC_ANSWER)
            }
            Err(e) => {
                warn!(node = self.name(), error = %e, "unparseable composition");
                Answer::plain(prompts::GENERIC_ANSWER)
            }
        };
        state.answer = Some(answer);
        state.stage = Stage::Composing;
        Ok(Action::DEFAULT)
    }
}
