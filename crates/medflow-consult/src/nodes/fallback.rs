use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use medflow_core::error::Result;
use medflow_core::traits::SearchIndex;
use medflow_core::types::{Answer, KbEntry, Role};
use medflow_engine::{Action, Step};

use crate::prompts;
use crate::state::{ConsultState, Stage};

/// Leaf taken when the model is overloaded. Guarantees a reply without any
/// model call: a fixed apology plus sampled knowledge-base questions the
/// user could try instead.
pub struct DirectFallback {
    search: Arc<dyn SearchIndex>,
    followup_cap: usize,
}

impl DirectFallback {
    pub fn new(search: Arc<dyn SearchIndex>, followup_cap: usize) -> Self {
        Self {
            search,
            followup_cap,
        }
    }
}

impl Step<ConsultState> for DirectFallback {
    type Input = Role;
    type Output = Vec<KbEntry>;

    fn name(&self) -> &str {
        super::names::FALLBACK
    }

    fn gather(&self, state: &ConsultState) -> Result<Self::Input> {
        Ok(state.role)
    }

    fn compute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>> {
        self.search.sample_for_role(*input, self.followup_cap)
    }

    fn commit(
        &self,
        state: &mut ConsultState,
        _input: Self::Input,
        outcome: Result<Self::Output>,
    ) -> Result<Action> {
        let followups = match outcome {
            Ok(entries) => entries.into_iter().map(|e| e.question).collect(),
            Err(e) => {
                warn!(node = self.name(), error = %e, "sampling failed, no suggestions");
                Vec::new()
            }
        };
        state.answer = Some(Answer {
            explanation: prompts::FALLBACK_ANSWER.to_string(),
            followups,
        });
        state.stage = Stage::Composing;
        Ok(Action::DEFAULT)
    }
}
