//! Post-turn memory maintenance pipeline.
//!
//! After a consultation turn completes, a planner model decides which
//! long-term memories to insert, update, and delete; the mutations then run
//! as three dedicated nodes, the write-heavy ones fanning out per item. The
//! pipeline is best-effort: it runs after the user already has their answer,
//! and any failure degrades to skipped or partially applied mutations, never
//! to a failed turn.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use medflow_core::error::Result;
use medflow_core::traits::{LanguageModel, UserMemory};
use medflow_core::types::{MemoryEntry, MemoryId, Role};
use medflow_engine::{Action, BatchReport, BatchStep, Graph, RetryPolicy, Step};

use crate::parse::{self, Importance, PlanDecision, UpdateOp};
use crate::prompts;

mod names {
    pub const PLAN: &str = "plan_mutations";
    pub const INSERT: &str = "insert_memories";
    pub const UPDATE: &str = "update_memories";
    pub const DELETE: &str = "delete_memories";
}

/// Label taken when the planner decided there is nothing to change. Has no
/// outgoing edge, so the run ends at the planner.
const SKIP: Action = Action::from_static("skip");

/// A sanitized mutation plan: referenced ids exist in the snapshot, and the
/// insert/update/delete id sets are disjoint by construction.
#[derive(Debug, Clone, Default)]
pub struct MutationPlan {
    pub inserts: Vec<String>,
    pub updates: Vec<UpdateOp>,
    pub deletes: Vec<MemoryId>,
    pub importance: Importance,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Drop operations that reference unknown memories, and deletes that
    /// collide with updates. Inserts mint fresh ids, so they cannot collide.
    fn sanitize(decision: PlanDecision, snapshot: &[MemoryEntry]) -> Self {
        let known = |id: &MemoryId| snapshot.iter().any(|m| &m.id == id);

        let inserts: Vec<String> = decision
            .insert_operations
            .into_iter()
            .map(|op| op.content)
            .filter(|c| !c.trim().is_empty())
            .collect();
        let updates: Vec<UpdateOp> = decision
            .update_operations
            .into_iter()
            .filter(|op| known(&op.memory_id) && !op.content.trim().is_empty())
            .collect();
        let deletes: Vec<MemoryId> = decision
            .delete_operations
            .into_iter()
            .map(|op| op.memory_id)
            .filter(|id| known(id) && !updates.iter().any(|u| &u.memory_id == id))
            .collect();

        Self {
            inserts,
            updates,
            deletes,
            importance: decision.importance,
        }
    }
}

/// What the maintenance run actually did, per operation kind.
#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    pub inserted: Vec<MemoryId>,
    pub updates: BatchReport,
    pub deletes: BatchReport,
}

/// Shared state of one maintenance run.
#[derive(Debug, Clone)]
pub struct MemoryState {
    pub user: String,
    pub role: Role,
    pub query: String,
    pub context_summary: String,
    pub answer_text: String,
    /// Memory snapshot the planner reasons over; plans may only reference
    /// ids present here.
    pub memories: Vec<MemoryEntry>,
    pub plan: Option<MutationPlan>,
    pub outcome: MutationOutcome,
}

impl MemoryState {
    pub fn new(
        user: impl Into<String>,
        role: Role,
        query: impl Into<String>,
        context_summary: impl Into<String>,
        answer_text: impl Into<String>,
        memories: Vec<MemoryEntry>,
    ) -> Self {
        Self {
            user: user.into(),
            role,
            query: query.into(),
            context_summary: context_summary.into(),
            answer_text: answer_text.into(),
            memories,
            plan: None,
            outcome: MutationOutcome::default(),
        }
    }
}

/// Planner node: one model call deciding the full mutation set.
///
/// Any failure, overload included, skips the whole maintenance run.
pub struct PlanMutations {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl PlanMutations {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }
}

impl Step<MemoryState> for PlanMutations {
    type Input = String;
    type Output = String;

    fn name(&self) -> &str {
        names::PLAN
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &MemoryState) -> Result<Self::Input> {
        Ok(prompts::plan_mutations(
            &state.query,
            state.role,
            &state.context_summary,
            &state.answer_text,
            &state.memories,
        ))
    }

    fn compute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>> {
        self.llm.complete(input, true)
    }

    fn commit(
        &self,
        state: &mut MemoryState,
        _input: Self::Input,
        outcome: Result<Self::Output>,
    ) -> Result<Action> {
        let decision = outcome
            .and_then(|text| parse::parse_response::<PlanDecision>(&text));
        let plan = match decision {
            Ok(d) => MutationPlan::sanitize(d, &state.memories),
            Err(e) => {
                warn!(node = self.name(), error = %e, "planning failed, skipping maintenance");
                return Ok(SKIP);
            }
        };
        if plan.is_empty() {
            info!(node = self.name(), "nothing worth remembering");
            return Ok(SKIP);
        }
        info!(
            node = self.name(),
            inserts = plan.inserts.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            importance = ?plan.importance,
            "mutation plan ready"
        );
        state.plan = Some(plan);
        Ok(Action::DEFAULT)
    }
}

/// Fan-out node storing the planned new memories, one store call per item.
pub struct InsertMemories {
    memory: Arc<dyn UserMemory>,
    retry: RetryPolicy,
}

impl InsertMemories {
    pub fn new(memory: Arc<dyn UserMemory>, retry: RetryPolicy) -> Self {
        Self { memory, retry }
    }
}

impl BatchStep<MemoryState> for InsertMemories {
    type Item = (String, String);
    type ItemOutput = MemoryId;

    fn name(&self) -> &str {
        names::INSERT
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &MemoryState) -> Result<Vec<Self::Item>> {
        let contents = state
            .plan
            .as_ref()
            .map(|p| p.inserts.clone())
            .unwrap_or_default();
        Ok(contents
            .into_iter()
            .map(|content| (state.user.clone(), content))
            .collect())
    }

    fn compute_item<'a>(
        &'a self,
        (user, content): &'a Self::Item,
    ) -> BoxFuture<'a, Result<Self::ItemOutput>> {
        self.memory.insert(user, content)
    }

    fn commit(
        &self,
        state: &mut MemoryState,
        _items: Vec<Self::Item>,
        outcomes: Vec<Result<Self::ItemOutput>>,
    ) -> Result<Action> {
        let report = BatchReport::from_outcomes(&outcomes);
        if !report.all_succeeded() {
            warn!(node = self.name(), failed = report.failed, errors = ?report.first_errors, "some inserts failed");
        }
        state.outcome.inserted = outcomes.into_iter().filter_map(|o| o.ok()).collect();
        Ok(Action::DEFAULT)
    }
}

/// Fan-out node rewriting the content of planned memory updates.
pub struct UpdateMemories {
    memory: Arc<dyn UserMemory>,
    retry: RetryPolicy,
}

impl UpdateMemories {
    pub fn new(memory: Arc<dyn UserMemory>, retry: RetryPolicy) -> Self {
        Self { memory, retry }
    }
}

impl BatchStep<MemoryState> for UpdateMemories {
    type Item = (String, UpdateOp);
    type ItemOutput = ();

    fn name(&self) -> &str {
        names::UPDATE
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &MemoryState) -> Result<Vec<Self::Item>> {
        let updates = state
            .plan
            .as_ref()
            .map(|p| p.updates.clone())
            .unwrap_or_default();
        Ok(updates
            .into_iter()
            .map(|op| (state.user.clone(), op))
            .collect())
    }

    fn compute_item<'a>(
        &'a self,
        (user, op): &'a Self::Item,
    ) -> BoxFuture<'a, Result<Self::ItemOutput>> {
        self.memory.update(user, &op.memory_id, &op.content)
    }

    fn commit(
        &self,
        state: &mut MemoryState,
        _items: Vec<Self::Item>,
        outcomes: Vec<Result<Self::ItemOutput>>,
    ) -> Result<Action> {
        let report = BatchReport::from_outcomes(&outcomes);
        if !report.all_succeeded() {
            warn!(node = self.name(), failed = report.failed, errors = ?report.first_errors, "some updates failed");
        }
        state.outcome.updates = report;
        Ok(Action::DEFAULT)
    }
}

/// Terminal node removing the planned memories in one store round-trip.
///
/// The store reports per-id outcomes, so a single bad id does not mask the
/// other deletions.
pub struct DeleteMemories {
    memory: Arc<dyn UserMemory>,
    retry: RetryPolicy,
}

impl DeleteMemories {
    pub fn new(memory: Arc<dyn UserMemory>, retry: RetryPolicy) -> Self {
        Self { memory, retry }
    }
}

impl Step<MemoryState> for DeleteMemories {
    type Input = (String, Vec<MemoryId>);
    type Output = Vec<(MemoryId, Result<()>)>;

    fn name(&self) -> &str {
        names::DELETE
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn gather(&self, state: &MemoryState) -> Result<Self::Input> {
        let ids = state
            .plan
            .as_ref()
            .map(|p| p.deletes.clone())
            .unwrap_or_default();
        Ok((state.user.clone(), ids))
    }

    fn compute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>> {
        let (user, ids) = input;
        if ids.is_empty() {
            return Box::pin(async { Ok(Vec::new()) });
        }
        self.memory.batch_delete(user, ids)
    }

    fn commit(
        &self,
        state: &mut MemoryState,
        _input: Self::Input,
        outcome: Result<Self::Output>,
    ) -> Result<Action> {
        match outcome {
            Ok(per_id) => {
                let results: Vec<Result<()>> =
                    per_id.into_iter().map(|(_, result)| result).collect();
                let report = BatchReport::from_outcomes(&results);
                if !report.all_succeeded() {
                    warn!(node = self.name(), failed = report.failed, "some deletions failed");
                }
                state.outcome.deletes = report;
            }
            Err(e) => {
                warn!(node = self.name(), error = %e, "deletion round-trip failed");
                state.outcome.deletes = BatchReport {
                    total: 0,
                    succeeded: 0,
                    failed: 0,
                    first_errors: vec![e.to_string()],
                };
            }
        }
        Ok(Action::DEFAULT)
    }
}

/// Build the maintenance graph: plan, then insert, update, delete in order.
pub fn memory_graph(
    llm: Arc<dyn LanguageModel>,
    memory: Arc<dyn UserMemory>,
    retry: RetryPolicy,
) -> Result<Graph<MemoryState>> {
    Graph::builder()
        .step(PlanMutations::new(llm, retry))
        .batch(InsertMemories::new(memory.clone(), retry))
        .batch(UpdateMemories::new(memory.clone(), retry))
        .step(DeleteMemories::new(memory, retry))
        .start(names::PLAN)
        .then(names::PLAN, names::INSERT)
        .then(names::INSERT, names::UPDATE)
        .then(names::UPDATE, names::DELETE)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Vec<MemoryEntry> {
        vec![
            MemoryEntry {
                id: "m1".into(),
                content: "thích trà".into(),
                score: 0.9,
            },
            MemoryEntry {
                id: "m2".into(),
                content: "28 tuổi".into(),
                score: 0.5,
            },
        ]
    }

    #[test]
    fn test_sanitize_drops_unknown_ids() {
        let decision: PlanDecision = serde_json::from_str(
            r#"{
                "insert_operations": [{"content": "bị tiểu đường type 2"}],
                "update_operations": [{"memory_id": "m2", "content": "29 tuổi"},
                                      {"memory_id": "ghost", "content": "x"}],
                "delete_operations": [{"memory_id": "ghost"}]
            }"#,
        )
        .unwrap();
        let plan = MutationPlan::sanitize(decision, &snapshot());
        assert_eq!(plan.inserts, vec!["bị tiểu đường type 2"]);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].memory_id, "m2");
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_sanitize_keeps_update_and_delete_disjoint() {
        let decision: PlanDecision = serde_json::from_str(
            r#"{
                "update_operations": [{"memory_id": "m1", "content": "thích cà phê"}],
                "delete_operations": [{"memory_id": "m1"}, {"memory_id": "m2"}]
            }"#,
        )
        .unwrap();
        let plan = MutationPlan::sanitize(decision, &snapshot());
        assert_eq!(plan.updates[0].memory_id, "m1");
        assert_eq!(plan.deletes, vec!["m2".to_string()]);
    }

    #[test]
    fn test_sanitize_drops_blank_content() {
        let decision: PlanDecision = serde_json::from_str(
            r#"{
                "insert_operations": [{"content": "   "}],
                "update_operations": [{"memory_id": "m1", "content": ""}]
            }"#,
        )
        .unwrap();
        let plan = MutationPlan::sanitize(decision, &snapshot());
        assert!(plan.is_empty());
    }
}
