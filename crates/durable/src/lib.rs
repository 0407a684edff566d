//! # Durable Execution Engine
//!
//! A checkpointed workflow engine for multi-step jobs that must survive
//! crashes, timeouts and retries without applying a step's effect twice.
//!
//! ## Features
//!
//! - **Checkpointed steps**: every attempt and every completed step is persisted
//!   as an event; a resumed run skips steps that already completed
//! - **Explicit step outcomes**: a step returns `Ok`, a retryable error or a
//!   terminal error, and the retry decision is a pure function of that kind
//! - **Bounded retries**: exponential backoff with jitter, a fixed attempt
//!   ceiling and an optional per-attempt timeout
//! - **Compensation**: a terminal step failure runs the workflow's compensating
//!   step before the instance is marked failed
//! - **Dedup keys**: at most one live instance per key
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                          │
//! │  (one tokio task per instance, bounded by a semaphore)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowExecutor                         │
//! │  (replays checkpoints, runs steps in order, retries)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CheckpointStore                          │
//! │  (PostgreSQL: durable_workflow_instances, events)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use timeglow_durable::prelude::*;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Workflow for Greeter {
//!     const TYPE: &'static str = "greeter";
//!     type Input = String;
//!
//!     fn steps(&self) -> &'static [&'static str] {
//!         &["greet"]
//!     }
//!
//!     async fn execute_step(
//!         &self,
//!         ctx: &StepContext<'_>,
//!         input: &Self::Input,
//!     ) -> Result<serde_json::Value, StepError> {
//!         Ok(json!({ "greeting": format!("hello {input}") }))
//!     }
//! }
//! ```

pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod step;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{ExecutorConfig, ExecutorError, RunOutcome, WorkflowExecutor};
    pub use crate::persistence::{
        CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore, StoreError,
        WorkflowInfo, WorkflowStatus,
    };
    pub use crate::reliability::{RetryDecision, RetryPolicy};
    pub use crate::step::{StepContext, StepError, StepErrorKind};
    pub use crate::worker::{RunHandle, RunnerConfig, RunnerError, WorkflowRunner};
    pub use crate::workflow::{StepOptions, Workflow, WorkflowError, WorkflowEvent};
}

// Re-export key types at crate root
pub use engine::{ExecutorConfig, ExecutorError, RunOutcome, WorkflowExecutor};
pub use persistence::{
    CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore, StoreError, WorkflowInfo,
    WorkflowStatus,
};
pub use reliability::{RetryDecision, RetryPolicy};
pub use step::{StepContext, StepError, StepErrorKind};
pub use worker::{RunHandle, RunnerConfig, RunnerError, WorkflowRunner};
pub use workflow::{StepOptions, Workflow, WorkflowError, WorkflowEvent};
