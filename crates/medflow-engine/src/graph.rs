use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use medflow_core::error::{FlowError, Result};

use crate::batch::{BatchAdapter, BatchStep};
use crate::step::{ErasedStep, Step, StepAdapter};

/// Routing label returned by a step's commit phase.
///
/// Edges are keyed by `(source node, action)`; `Action::DEFAULT` is the
/// implicit label for steps with a single continuation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Action(Cow<'static, str>);

impl Action {
    pub const DEFAULT: Action = Action(Cow::Borrowed("default"));
    pub const FALLBACK: Action = Action(Cow::Borrowed("fallback"));

    pub fn new(label: impl Into<String>) -> Self {
        Action(Cow::Owned(label.into()))
    }

    pub const fn from_static(label: &'static str) -> Self {
        Action(Cow::Borrowed(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Action {
    fn from(label: &'static str) -> Self {
        Action::from_static(label)
    }
}

impl From<String> for Action {
    fn from(label: String) -> Self {
        Action::new(label)
    }
}

/// A validated workflow graph: named steps, `(source, action)` edges, one
/// start node.
///
/// All structural errors — duplicate nodes, duplicate edges, dangling
/// destinations, an unknown start — are rejected by [`GraphBuilder::build`],
/// never at run time.
pub struct Graph<S> {
    nodes: HashMap<String, Box<dyn ErasedStep<S>>>,
    edges: HashMap<(String, Action), String>,
    start: String,
}

impl<S> fmt::Debug for Graph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("start", &self.start)
            .finish()
    }
}

impl<S: Send> Graph<S> {
    pub fn builder() -> GraphBuilder<S> {
        GraphBuilder::new()
    }

    pub fn start_node(&self) -> &str {
        &self.start
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node(&self, name: &str) -> Option<&dyn ErasedStep<S>> {
        self.nodes.get(name).map(|b| b.as_ref())
    }

    /// Destination of the `(from, action)` edge, if one is registered.
    pub fn next(&self, from: &str, action: &Action) -> Option<&str> {
        self.edges
            .get(&(from.to_string(), action.clone()))
            .map(String::as_str)
    }
}

/// Builder collecting steps and edges before validation.
pub struct GraphBuilder<S> {
    nodes: Vec<(String, Box<dyn ErasedStep<S>>)>,
    edges: Vec<(String, Action, String)>,
    start: Option<String>,
}

impl<S: Send> GraphBuilder<S> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            start: None,
        }
    }

    /// Register a three-phase step.
    pub fn step<T>(mut self, step: T) -> Self
    where
        T: Step<S> + 'static,
        S: 'static,
    {
        let name = step.name().to_string();
        self.nodes.push((name, Box::new(StepAdapter(step))));
        self
    }

    /// Register a parallel fan-out step.
    pub fn batch<T>(mut self, step: T) -> Self
    where
        T: BatchStep<S> + 'static,
        S: 'static,
    {
        let name = step.name().to_string();
        self.nodes.push((name, Box::new(BatchAdapter(step))));
        self
    }

    /// Designate the start node.
    pub fn start(mut self, name: impl Into<String>) -> Self {
        self.start = Some(name.into());
        self
    }

    /// Register an edge `(from, action) -> to`.
    pub fn edge(
        mut self,
        from: impl Into<String>,
        action: impl Into<Action>,
        to: impl Into<String>,
    ) -> Self {
        self.edges.push((from.into(), action.into(), to.into()));
        self
    }

    /// Shorthand for the implicit `default` continuation.
    pub fn then(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edge(from, Action::DEFAULT, to)
    }

    /// Validate and assemble the graph.
    pub fn build(self) -> Result<Graph<S>> {
        let mut nodes: HashMap<String, Box<dyn ErasedStep<S>>> = HashMap::new();
        for (name, step) in self.nodes {
            if nodes.insert(name.clone(), step).is_some() {
                return Err(FlowError::Graph(format!("duplicate node '{name}'")));
            }
        }

        let start = self
            .start
            .ok_or_else(|| FlowError::Graph("no start node designated".into()))?;
        if !nodes.contains_key(&start) {
            return Err(FlowError::Graph(format!("start node '{start}' not registered")));
        }

        let mut edges: HashMap<(String, Action), String> = HashMap::new();
        for (from, action, to) in self.edges {
            if !nodes.contains_key(&from) {
                return Err(FlowError::Graph(format!(
                    "edge source '{from}' not registered"
                )));
            }
            if !nodes.contains_key(&to) {
                return Err(FlowError::Graph(format!(
                    "edge '{from}' --{action}--> '{to}' has a dangling destination"
                )));
            }
            if edges.insert((from.clone(), action.clone()), to).is_some() {
                return Err(FlowError::Graph(format!(
                    "duplicate edge ('{from}', '{action}')"
                )));
            }
        }

        Ok(Graph {
            nodes,
            edges,
            start,
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;

    struct Noop(&'static str);

    impl Step<()> for Noop {
        type Input = ();
        type Output = ();

        fn name(&self) -> &str {
            self.0
        }

        fn gather(&self, _state: &()) -> Result<()> {
            Ok(())
        }

        fn compute<'a>(&'a self, _input: &'a ()) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn commit(&self, _state: &mut (), _input: (), _outcome: Result<()>) -> Result<Action> {
            Ok(Action::DEFAULT)
        }
    }

    #[test]
    fn test_valid_graph_builds() {
        let graph = Graph::builder()
            .step(Noop("a"))
            .step(Noop("b"))
            .start("a")
            .then("a", "b")
            .build()
            .unwrap();

        assert_eq!(graph.start_node(), "a");
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.next("a", &Action::DEFAULT), Some("b"));
        assert_eq!(graph.next("b", &Action::DEFAULT), None);
    }

    #[test]
    fn test_dangling_destination_rejected() {
        let err = Graph::builder()
            .step(Noop("a"))
            .start("a")
            .edge("a", "go", "missing")
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::Graph(_)));
        assert!(err.to_string().contains("dangling"));
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let err = Graph::builder()
            .step(Noop("a"))
            .step(Noop("b"))
            .step(Noop("c"))
            .start("a")
            .edge("a", "go", "b")
            .edge("a", "go", "c")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate edge"));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let err = Graph::builder()
            .step(Noop("a"))
            .step(Noop("a"))
            .start("a")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate node"));
    }

    #[test]
    fn test_missing_start_rejected() {
        let err = Graph::<()>::builder().step(Noop("a")).build().unwrap_err();
        assert!(err.to_string().contains("no start node"));

        let err = Graph::builder()
            .step(Noop("a"))
            .start("nowhere")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_same_source_distinct_actions_allowed() {
        let graph = Graph::builder()
            .step(Noop("a"))
            .step(Noop("b"))
            .step(Noop("c"))
            .start("a")
            .edge("a", "left", "b")
            .edge("a", "right", "c")
            .build()
            .unwrap();

        assert_eq!(graph.next("a", &Action::from_static("left")), Some("b"));
        assert_eq!(graph.next("a", &Action::from_static("right")), Some("c"));
    }

    #[test]
    fn test_action_equality_across_representations() {
        assert_eq!(Action::new("default"), Action::DEFAULT);
        assert_eq!(Action::from_static("fallback"), Action::FALLBACK);
    }
}
