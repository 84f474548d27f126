//! The staged delivery workflow.
//!
//! One workflow run drives the fixed pipeline Planner, Builder, QA,
//! Production Readiness against a single workspace, threading each
//! stage's output to the next and halting on the first failure.

mod context;
mod engine;

pub use context::WorkflowContext;
pub use engine::{EngineError, WorkflowEngine, WorkflowOutcome, WorkflowState};
