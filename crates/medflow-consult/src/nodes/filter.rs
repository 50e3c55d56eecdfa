use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use medflow_core::error::Result;
use medflow_core::traits::LanguageModel;
use medflow_engine::{Action, RetryPolicy, Step};

use crate::parse::{self, FilterDecision};
use crate::prompts;
use crate::state::{ConsultState, Stage};

/// What the filter pass has to do for this candidate set.
pub enum FilterInput {
    /// Few enough candidates that all of them are kept without a model call.
    KeepAll(Vec<String>),
    /// Ask the model to choose; the prompt embeds the candidate listing.
    Ask { prompt: String },
}

/// Narrows the retrieved candidates to the ones worth composing from.
///
/// Small candidate sets skip the model entirely. When the model answers but
/// the selection is unusable, the top candidates by score stand in; only
/// overload escapes to the fallback edge.
pub struct FilterCandidates {
    llm: Arc<dyn LanguageModel>,
    min_to_filter: usize,
    max_selected: usize,
    retry: RetryPolicy,
}

impl FilterCandidates {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        min_to_filter: usize,
        max_selected: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            min_to_filter,
            max_selected,
            retry,
        }
    }

    fn top_by_score(&self, state: &ConsultState) -> Vec<String> {
        state
            .candidates
            .iter()
            .take(self.max_selected)
            .map(|c| c.id.clone())
            .collect()
    }
}

impl Step<ConsultState> for FilterCandidates {
    type Input = FilterInput;
    type Output = Option<String>;

    fn name(&self) -> &str {
        super::names::FILTER
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &ConsultState) -> Result<Self::Input> {
        if state.candidates.len() <= self.min_to_filter {
            Ok(FilterInput::KeepAll(
                state.candidates.iter().map(|c| c.id.clone()).collect(),
            ))
        } else {
            Ok(FilterInput::Ask {
                prompt: prompts::filter_candidates(
                    state.search_query(),
                    &state.candidates,
                    self.max_selected,
                ),
            })
        }
    }

    fn compute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>> {
        match input {
            FilterInput::KeepAll(_) => Box::pin(async { Ok(None) }),
            FilterInput::Ask { prompt } => {
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
        let selected = match outcome {
            Ok(None) => match input {
                FilterInput::KeepAll(ids) => {
                    info!(node = self.name(), kept = ids.len(), "small set, keeping all");
                    ids
                }
                FilterInput::Ask { .. } => self.top_by_score(state),
            },
            Ok(Some(text)) => match parse::parse_response::<FilterDecision>(&text) {
                Ok(decision) => {
                    let known: HashSet<&str> =
                        state.candidates.iter().map(|c| c.id.as_str()).collect();
                    let mut ids: Vec<String> = decision
                        .selected_ids
                        .into_iter()
                        .filter(|id| known.contains(id.as_str()))
                        .collect();
                    ids.truncate(self.max_selected);
                    if ids.is_empty() {
                        warn!(node = self.name(), "selection empty, taking top by score");
                        self.top_by_score(state)
                    } else {
                        info!(node = self.name(), kept = ids.len(), "candidates filtered");
                        ids
                    }
                }
                Err(e) => {
                    warn!(node = self.name(), error = %e, "unparseable selection, taking top by score");
                    self.top_by_score(state)
                }
            },
            Err(e) if e.is_overload() => {
                warn!(node = self.name(), "model overloaded, taking fallback");
                return Ok(Action::FALLBACK);
            }
            Err(e) => {
                warn!(node = self.name(), error = %e, "filter failed, taking top by score");
                self.top_by_score(state)
            }
        };

        state.selected_ids = selected;
        state.stage = Stage::Filtered;
        Ok(Action::DEFAULT)
    }
}
