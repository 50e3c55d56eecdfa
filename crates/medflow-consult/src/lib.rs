//! Medical consultation pipeline: classify, retrieve, filter, compose, and
//! the post-turn memory maintenance flow, all built on the workflow engine.
//!
//! Entry points are [`flow::run_turn`] for a complete turn and
//! [`flow::run_consultation`] when the caller manages memory itself.

pub mod flow;
pub mod index;
pub mod memory_flow;
pub mod nodes;
pub mod parse;
pub mod prompts;
pub mod state;

pub use flow::{
    run_consultation, run_turn, Collaborators, ConsultOutcome, ConsultRequest, TurnOutcome,
};
pub use index::KeywordIndex;
pub use state::{ConsultState, Stage};
