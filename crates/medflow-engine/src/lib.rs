//! Directed workflow execution engine.
//!
//! A workflow is a graph of named steps over one shared mutable state. Each
//! step runs a three-phase contract (gather → compute → commit-and-route);
//! the commit phase returns an action label that selects the next edge. The
//! runner walks edges until an action has no match (normal termination) or a
//! step limit trips (run failure).
//!
//! Concurrency lives inside steps: every compute phase is awaited without
//! blocking, and [`BatchStep`] fans independent items out to concurrent
//! workers joined by an all-complete barrier before its commit runs. The
//! shared state is only ever touched by the one commit phase currently
//! executing.

pub mod batch;
pub mod graph;
pub mod retry;
pub mod runner;
pub mod step;

pub use batch::{BatchReport, BatchStep};
pub use graph::{Action, Graph, GraphBuilder};
pub use retry::{Backoff, RetryPolicy};
pub use runner::{RunReport, Runner, StepTrace};
pub use step::Step;
