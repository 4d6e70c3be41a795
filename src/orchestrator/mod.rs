//! Orchestrator - plan, dispatch, review, verify, final-review
//!
//! [`Orchestrator`] owns one build's control loop; [`ContextManager`]
//! keeps its conversation under budget.

mod context;
mod engine;

pub use context::ContextManager;
pub use engine::{BuildOutcome, Orchestrator, OrchestratorError};
