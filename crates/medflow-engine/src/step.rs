use futures::future::BoxFuture;

use medflow_core::error::Result;

use crate::graph::Action;
use crate::retry::{retrying, RetryPolicy};

/// One unit of work in a workflow graph, visited in three phases.
///
/// 1. `gather` reads the shared state and builds an owned input. It must not
///    mutate state; a missing required value is a contract violation
///    (`FlowError::MissingInput`).
/// 2. `compute` does the actual work — an LLM call, a search, a pure
///    transformation. It never touches the shared state, may be slow, and may
///    fail; this is the phase the retry policy applies to.
/// 3. `commit` is the only phase allowed to mutate state. It receives the
///    gathered input and the compute outcome (the error, when the retry
///    budget was exhausted) and must return exactly one routing action —
///    returning `Err` aborts the whole run.
pub trait Step<S>: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn name(&self) -> &str;

    /// Retry policy for the compute phase. Default: single attempt.
    fn retry(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn gather(&self, state: &S) -> Result<Self::Input>;

    fn compute<'a>(&'a self, input: &'a Self::Input) -> BoxFuture<'a, Result<Self::Output>>;

    fn commit(
        &self,
        state: &mut S,
        input: Self::Input,
        outcome: Result<Self::Output>,
    ) -> Result<Action>;
}

/// Object-safe execution surface the runner dispatches on.
///
/// Both [`Step`] and [`BatchStep`](crate::batch::BatchStep) erase to this via
/// adapters, so sync, suspending, and fan-out steps look identical to the
/// graph walk.
pub(crate) trait ErasedStep<S>: Send + Sync {
    fn name(&self) -> &str;

    fn execute<'a>(&'a self, state: &'a mut S) -> BoxFuture<'a, Result<Action>>;
}

pub(crate) struct StepAdapter<T>(pub T);

impl<S, T> ErasedStep<S> for StepAdapter<T>
where
    S: Send,
    T: Step<S>,
{
    fn name(&self) -> &str {
        self.0.name()
    }

    fn execute<'a>(&'a self, state: &'a mut S) -> BoxFuture<'a, Result<Action>> {
        Box::pin(async move {
            let input = self.0.gather(state)?;
            let policy = self.0.retry();
            let outcome = retrying(self.0.name(), &policy, || self.0.compute(&input)).await;
            self.0.commit(state, input, outcome)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use medflow_core::error::FlowError;

    use super::*;

    #[derive(Default)]
    struct CounterState {
        total: u32,
        errors: u32,
    }

    /// Adds a constant in compute and records it in commit.
    struct AddStep {
        amount: u32,
        fail_first: AtomicU32,
    }

    impl Step<CounterState> for AddStep {
        type Input = u32;
        type Output = u32;

        fn name(&self) -> &str {
            "add"
        }

        fn retry(&self) -> RetryPolicy {
            RetryPolicy::fixed(3, Duration::ZERO)
        }

        fn gather(&self, state: &CounterState) -> Result<u32> {
            Ok(state.total)
        }

        fn compute<'a>(&'a self, input: &'a u32) -> BoxFuture<'a, Result<u32>> {
            Box::pin(async move {
                if self.fail_first.load(Ordering::SeqCst) > 0 {
                    self.fail_first.fetch_sub(1, Ordering::SeqCst);
                    return Err(FlowError::Overloaded("simulated".into()));
                }
                Ok(input + self.amount)
            })
        }

        fn commit(
            &self,
            state: &mut CounterState,
            _input: u32,
            outcome: Result<u32>,
        ) -> Result<Action> {
            match outcome {
                Ok(sum) => {
                    state.total = sum;
                    Ok(Action::DEFAULT)
                }
                Err(_) => {
                    state.errors += 1;
                    Ok(Action::FALLBACK)
                }
            }
        }
    }

    #[tokio::test]
    async fn test_three_phase_execution() {
        let step = StepAdapter(AddStep {
            amount: 5,
            fail_first: AtomicU32::new(0),
        });
        let mut state = CounterState::default();

        let action = step.execute(&mut state).await.unwrap();
        assert_eq!(action, Action::DEFAULT);
        assert_eq!(state.total, 5);
    }

    #[tokio::test]
    async fn test_transient_failures_recovered_by_retry() {
        let step = StepAdapter(AddStep {
            amount: 2,
            fail_first: AtomicU32::new(2),
        });
        let mut state = CounterState::default();

        let action = step.execute(&mut state).await.unwrap();
        assert_eq!(action, Action::DEFAULT);
        assert_eq!(state.total, 2);
        assert_eq!(state.errors, 0);
    }

    #[tokio::test]
    async fn test_commit_receives_exhausted_error() {
        // More failures than retry budget: commit sees the error and routes
        // to fallback instead of aborting the run.
        let step = StepAdapter(AddStep {
            amount: 2,
            fail_first: AtomicU32::new(10),
        });
        let mut state = CounterState::default();

        let action = step.execute(&mut state).await.unwrap();
        assert_eq!(action, Action::FALLBACK);
        assert_eq!(state.total, 0);
        assert_eq!(state.errors, 1);
    }
}
