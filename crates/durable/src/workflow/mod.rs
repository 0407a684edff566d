//! Workflow abstractions and types
//!
//! - [`Workflow`] trait: an ordered list of checkpointed steps plus compensation
//! - [`StepOptions`] per-step retry and timeout settings
//! - [`WorkflowEvent`] enum for persisted checkpoints

mod definition;
mod event;
mod options;

pub use definition::{Workflow, WorkflowError};
pub use event::WorkflowEvent;
pub use options::StepOptions;
