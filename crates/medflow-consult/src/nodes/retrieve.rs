use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use medflow_core::error::Result;
use medflow_core::traits::SearchIndex;
use medflow_core::types::Candidate;
use medflow_engine::{Action, RetryPolicy, Step};

use crate::state::{ConsultState, Stage};

/// Parameters snapshotted from the state for one retrieval pass.
pub struct RetrieveInput {
    query: String,
    category: Option<String>,
    subcategory: Option<String>,
}

/// Runs the dual knowledge-base search: one pass narrowed by the category
/// hint, one unfiltered pass, merged and deduplicated best-score-first.
///
/// A search failure that survives the retry budget is committed as an empty
/// pass rather than aborting the run; the orchestration loop decides whether
/// to try again or clarify.
pub struct RetrieveCandidates {
    search: Arc<dyn SearchIndex>,
    top_k: usize,
    retry: RetryPolicy,
}

impl RetrieveCandidates {
    pub fn new(search: Arc<dyn SearchIndex>, top_k: usize, retry: RetryPolicy) -> Self {
        Self {
            search,
            top_k,
            retry,
        }
    }
}

/// Merge two candidate lists, keeping the best score per id, ordered
/// best-first and truncated to `top_k`.
fn merge_candidates(lists: Vec<Vec<Candidate>>, top_k: usize) -> Vec<Candidate> {
    let mut best: HashMap<String, Candidate> = HashMap::new();
    for candidate in lists.into_iter().flatten() {
        match best.get(&candidate.id) {
            Some(seen) if seen.score >= candidate.score => {}
            _ => {
                best.insert(candidate.id.clone(), candidate);
            }
        }
    }
    let mut merged: Vec<Candidate> = best.into_values().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(top_k);
    merged
}

impl Step<ConsultState> for RetrieveCandidates {
    type Input = RetrieveInput;
    type Output = Vec<Candidate>;

    fn name(&self) -> &str {
        super::names::RETRIEVE
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &ConsultState) -> Result<Self::Input> {
        Ok(RetrieveInput {
            query: state.search_query().to_string(),
            category: state.category.clone(),
            subcategory: state.subcategory.clone(),
        })
    }

    fn compute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let mut lists = Vec::with_capacity(2);
            if input.category.is_some() {
                let narrowed = self
                    .search
                    .search(
                        &input.query,
                        input.category.as_deref(),
                        input.subcategory.as_deref(),
                        self.top_k,
                    )
                    .await?;
                lists.push(narrowed);
            }
            let global = self
                .search
                .search(&input.query, None, None, self.top_k)
                .await?;
            lists.push(global);
            Ok(merge_candidates(lists, self.top_k))
        })
    }

    fn commit(
        &self,
        state: &mut ConsultState,
        _input: Self::Input,
        outcome: Result<Self::Output>,
    ) -> Result<Action> {
        // Every completed pass counts against the orchestration cap, even a
        // failed one, so a dead search backend cannot loop forever.
        state.retrieve_attempts += 1;
        match outcome {
            Ok(candidates) => {
                info!(
                    node = self.name(),
                    found = candidates.len(),
                    attempt = state.retrieve_attempts,
                    "retrieval pass complete"
                );
                state.candidates = candidates;
            }
            Err(e) => {
                warn!(node = self.name(), error = %e, "retrieval pass failed");
                state.candidates.clear();
            }
        }
        state.selected_ids.clear();
        state.stage = Stage::Retrieved;
        Ok(Action::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, score: f32) -> Candidate {
        Candidate {
            id: id.into(),
            question: format!("{id}?"),
            score,
        }
    }

    #[test]
    fn test_merge_keeps_best_score_per_id() {
        let merged = merge_candidates(
            vec![
                vec![cand("a", 0.4), cand("b", 0.9)],
                vec![cand("a", 0.7), cand("c", 0.5)],
            ],
            10,
        );
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].id, "b");
        assert_eq!(merged[1].id, "a");
        assert!((merged[1].score - 0.7).abs() < f32::EPSILON);
        assert_eq!(merged[2].id, "c");
    }

    #[test]
    fn test_merge_truncates_to_top_k() {
        let merged = merge_candidates(
            vec![vec![cand("a", 0.9), cand("b", 0.8), cand("c", 0.7)]],
            2,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "a");
    }
}
