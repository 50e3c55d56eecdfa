use futures::future::BoxFuture;
use tracing::debug;

use medflow_core::error::Result;

use crate::graph::Action;
use crate::retry::{retrying, RetryPolicy};
use crate::step::ErasedStep;

/// A step whose compute phase fans out over independent items.
///
/// `gather` derives an ordered item sequence from the shared state. Each item
/// is computed concurrently and in isolation — one failure neither cancels
/// nor affects the others — and the step waits for *all* of them before
/// committing (join barrier, not a race). `commit` receives the outcomes in
/// the original item order regardless of completion order.
pub trait BatchStep<S>: Send + Sync {
    type Item: Send + Sync;
    type ItemOutput: Send;

    fn name(&self) -> &str;

    /// Per-item retry policy. Default: single attempt per item.
    fn retry(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn gather(&self, state: &S) -> Result<Vec<Self::Item>>;

    fn compute_item<'a>(&'a self, item: &'a Self::Item)
        -> BoxFuture<'a, Result<Self::ItemOutput>>;

    fn commit(
        &self,
        state: &mut S,
        items: Vec<Self::Item>,
        outcomes: Vec<Result<Self::ItemOutput>>,
    ) -> Result<Action>;
}

pub(crate) struct BatchAdapter<T>(pub T);

impl<S, T> ErasedStep<S> for BatchAdapter<T>
where
    S: Send,
    T: BatchStep<S>,
{
    fn name(&self) -> &str {
        self.0.name()
    }

    fn execute<'a>(&'a self, state: &'a mut S) -> BoxFuture<'a, Result<Action>> {
        Box::pin(async move {
            let items = self.0.gather(state)?;
            let policy = self.0.retry();

            // Fan out with isolation; join_all preserves item order.
            let futs = items
                .iter()
                .map(|item| retrying(self.0.name(), &policy, move || self.0.compute_item(item)));
            let outcomes = futures::future::join_all(futs).await;

            let failed = outcomes.iter().filter(|o| o.is_err()).count();
            debug!(
                step = %self.0.name(),
                items = items.len(),
                failed,
                "Batch fan-out complete"
            );

            self.0.commit(state, items, outcomes)
        })
    }
}

/// Aggregate view of a batch's per-item outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// First few error messages, for logging and the outcome summary.
    pub first_errors: Vec<String>,
}

impl BatchReport {
    pub const MAX_RECORDED_ERRORS: usize = 3;

    pub fn from_outcomes<T>(outcomes: &[Result<T>]) -> Self {
        let mut report = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    if report.first_errors.len() < Self::MAX_RECORDED_ERRORS {
                        report.first_errors.push(e.to_string());
                    }
                }
            }
        }
        report
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use medflow_core::error::FlowError;

    use super::*;

    #[derive(Default)]
    struct SumState {
        values: Vec<u32>,
        report: Option<BatchReport>,
        ordered_outputs: Vec<Option<u32>>,
    }

    /// Doubles every even value; odd values fail. Delay is inversely
    /// proportional to the value so completion order differs from item order.
    struct DoubleEvens;

    impl BatchStep<SumState> for DoubleEvens {
        type Item = u32;
        type ItemOutput = u32;

        fn name(&self) -> &str {
            "double-evens"
        }

        fn gather(&self, state: &SumState) -> Result<Vec<u32>> {
            Ok(state.values.clone())
        }

        fn compute_item<'a>(&'a self, item: &'a u32) -> BoxFuture<'a, Result<u32>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(*item as u64)))
                    .await;
                if item % 2 == 0 {
                    Ok(item * 2)
                } else {
                    Err(FlowError::Memory(format!("odd item {item}")))
                }
            })
        }

        fn commit(
            &self,
            state: &mut SumState,
            _items: Vec<u32>,
            outcomes: Vec<Result<u32>>,
        ) -> Result<Action> {
            state.report = Some(BatchReport::from_outcomes(&outcomes));
            state.ordered_outputs = outcomes.into_iter().map(|o| o.ok()).collect();
            Ok(Action::DEFAULT)
        }
    }

    #[tokio::test]
    async fn test_fan_out_isolation_and_aggregate() {
        let step = BatchAdapter(DoubleEvens);
        let mut state = SumState {
            values: vec![1, 2, 3, 4, 5, 6],
            ..SumState::default()
        };

        step.execute(&mut state).await.unwrap();

        let report = state.report.unwrap();
        assert_eq!(report.total, 6);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 3);
        assert_eq!(report.first_errors.len(), BatchReport::MAX_RECORDED_ERRORS);
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn test_outcomes_keep_item_order() {
        // Sleeps make later items finish first; the join barrier must still
        // hand commit the original order.
        let step = BatchAdapter(DoubleEvens);
        let mut state = SumState {
            values: vec![2, 4, 6, 8],
            ..SumState::default()
        };

        step.execute(&mut state).await.unwrap();

        assert_eq!(
            state.ordered_outputs,
            vec![Some(4), Some(8), Some(12), Some(16)]
        );
    }

    #[tokio::test]
    async fn test_empty_batch_commits() {
        let step = BatchAdapter(DoubleEvens);
        let mut state = SumState::default();

        let action = step.execute(&mut state).await.unwrap();
        assert_eq!(action, Action::DEFAULT);
        assert_eq!(state.report.unwrap().total, 0);
    }

    #[test]
    fn test_report_counts() {
        let outcomes: Vec<Result<()>> = vec![
            Ok(()),
            Err(FlowError::Memory("a".into())),
            Ok(()),
            Err(FlowError::Memory("b".into())),
        ];
        let report = BatchReport::from_outcomes(&outcomes);
        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.first_errors.len(), 2);
    }
}
