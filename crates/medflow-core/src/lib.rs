//! Core types, collaborator traits, and error hierarchy for medflow.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{FlowError, Result};
