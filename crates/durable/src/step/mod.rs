//! Step abstractions
//!
//! A step is one checkpointed unit of a workflow. It:
//! - Returns `Ok(output)`, a retryable error or a terminal error
//! - Sees the outputs of the steps that completed before it
//! - May run more than once, so its side effects must be idempotent

mod context;
mod error;

pub use context::StepContext;
pub use error::{StepError, StepErrorKind};
