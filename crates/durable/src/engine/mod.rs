//! Workflow execution engine
//!
//! The engine module provides the `WorkflowExecutor`, which replays an
//! instance's checkpoint log and drives its remaining steps to completion.

mod executor;
mod replay;

pub use executor::{ExecutorConfig, ExecutorError, RunOutcome, WorkflowExecutor};
