use std::time::{Duration, Instant};

use tracing::{debug, info};

use medflow_core::error::{FlowError, Result};

use crate::graph::{Action, Graph};

/// One node visit recorded in the run trace.
#[derive(Debug, Clone)]
pub struct StepTrace {
    pub node: String,
    pub action: Action,
    pub elapsed_ms: u64,
}

/// Linear trace of one graph run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub trace: Vec<StepTrace>,
    pub total_elapsed_ms: u64,
}

impl RunReport {
    /// Node names in visit order.
    pub fn visited(&self) -> Vec<&str> {
        self.trace.iter().map(|t| t.node.as_str()).collect()
    }

    pub fn steps(&self) -> usize {
        self.trace.len()
    }
}

/// Drives a graph over one shared state.
///
/// Each iteration runs the current node's full three-phase contract, then
/// follows the `(node, action)` edge. A missing edge is the normal terminal
/// condition; exceeding `max_steps` is a run-level failure, distinct from
/// normal termination. The runner never inspects the shared state — control
/// flow is carried entirely by action labels.
#[derive(Debug, Clone)]
pub struct Runner {
    max_steps: usize,
}

impl Runner {
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps }
    }

    pub async fn run<S: Send>(&self, graph: &Graph<S>, state: &mut S) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::default();
        let mut current = graph.start_node().to_string();

        loop {
            if report.trace.len() >= self.max_steps {
                return Err(FlowError::StepLimitExceeded {
                    limit: self.max_steps,
                });
            }

            // Unreachable after build-time validation, but never panic.
            let step = graph.node(&current).ok_or_else(|| {
                FlowError::Graph(format!("node '{current}' vanished from graph"))
            })?;

            info!(node = %current, step = report.trace.len(), "Visiting node");
            let step_started = Instant::now();
            let action = step.execute(state).await?;
            let elapsed_ms = step_started.elapsed().as_millis() as u64;

            debug!(node = %current, action = %action, elapsed_ms, "Node committed");
            report.trace.push(StepTrace {
                node: current.clone(),
                action: action.clone(),
                elapsed_ms,
            });

            match graph.next(&current, &action) {
                Some(next) => current = next.to_string(),
                None => break,
            }
        }

        report.total_elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            steps = report.steps(),
            total_elapsed_ms = report.total_elapsed_ms,
            "Run complete"
        );
        Ok(report)
    }

    /// Run with an overall deadline. On timeout the in-flight compute is
    /// dropped and the state must be treated as indeterminate by the caller.
    pub async fn run_with_timeout<S: Send>(
        &self,
        graph: &Graph<S>,
        state: &mut S,
        timeout: Duration,
    ) -> Result<RunReport> {
        match tokio::time::timeout(timeout, self.run(graph, state)).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use crate::step::Step;

    use super::*;

    type TraceState = Vec<String>;

    /// Records its visit and returns a scripted action.
    struct Scripted {
        name: &'static str,
        action: Action,
        delay: Duration,
    }

    impl Scripted {
        fn new(name: &'static str, action: impl Into<Action>) -> Self {
            Self {
                name,
                action: action.into(),
                delay: Duration::ZERO,
            }
        }
    }

    impl Step<TraceState> for Scripted {
        type Input = ();
        type Output = ();

        fn name(&self) -> &str {
            self.name
        }

        fn gather(&self, _state: &TraceState) -> medflow_core::Result<()> {
            Ok(())
        }

        fn compute<'a>(&'a self, _input: &'a ()) -> BoxFuture<'a, medflow_core::Result<()>> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                Ok(())
            })
        }

        fn commit(
            &self,
            state: &mut TraceState,
            _input: (),
            _outcome: medflow_core::Result<()>,
        ) -> medflow_core::Result<Action> {
            state.push(self.name.to_string());
            Ok(self.action.clone())
        }
    }

    #[tokio::test]
    async fn test_runner_follows_forced_actions() {
        let graph = Graph::builder()
            .step(Scripted::new("classify", "retrieve"))
            .step(Scripted::new("retrieve", "default"))
            .step(Scripted::new("filter", "compose"))
            .step(Scripted::new("compose", "default"))
            .start("classify")
            .edge("classify", "retrieve", "retrieve")
            .then("retrieve", "filter")
            .edge("filter", "compose", "compose")
            .build()
            .unwrap();

        let mut state = TraceState::new();
        let report = Runner::new(16).run(&graph, &mut state).await.unwrap();

        assert_eq!(state, vec!["classify", "retrieve", "filter", "compose"]);
        assert_eq!(
            report.visited(),
            vec!["classify", "retrieve", "filter", "compose"]
        );
    }

    #[tokio::test]
    async fn test_unmatched_action_terminates_normally() {
        let graph = Graph::builder()
            .step(Scripted::new("only", "nowhere"))
            .start("only")
            .build()
            .unwrap();

        let mut state = TraceState::new();
        let report = Runner::new(8).run(&graph, &mut state).await.unwrap();
        assert_eq!(report.steps(), 1);
    }

    #[tokio::test]
    async fn test_step_limit_is_a_distinct_failure() {
        // Two nodes cycling forever on default edges.
        let graph = Graph::builder()
            .step(Scripted::new("ping", "default"))
            .step(Scripted::new("pong", "default"))
            .start("ping")
            .then("ping", "pong")
            .then("pong", "ping")
            .build()
            .unwrap();

        let mut state = TraceState::new();
        let err = Runner::new(6).run(&graph, &mut state).await.unwrap_err();
        assert!(matches!(err, FlowError::StepLimitExceeded { limit: 6 }));
        assert_eq!(state.len(), 6);
    }

    #[tokio::test]
    async fn test_timeout_cancels_run() {
        let graph = Graph::builder()
            .step(Scripted {
                name: "slow",
                action: Action::DEFAULT,
                delay: Duration::from_secs(30),
            })
            .start("slow")
            .build()
            .unwrap();

        let mut state = TraceState::new();
        let err = Runner::new(8)
            .run_with_timeout(&graph, &mut state, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Cancelled));
        // Commit never ran for the cancelled node.
        assert!(state.is_empty());
    }
}
