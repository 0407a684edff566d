//! In-process runner for workflow instances
//!
//! - [`WorkflowRunner`] - spawns instances as tokio tasks with bounded concurrency
//! - [`RunnerConfig`] - concurrency and shutdown settings
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                          │
//! │                                                              │
//! │   spawn(id) ──┐        resume_incomplete() ──┐               │
//! │               ▼                              ▼               │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        Instance tasks (Semaphore-limited)           │    │
//! │  │  [run 1] [run 2] [run 3] ... [run N]                │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │               │                                              │
//! │               ▼                                              │
//! │        WorkflowExecutor::run_workflow                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use timeglow_durable::worker::{RunnerConfig, WorkflowRunner};
//!
//! let runner = WorkflowRunner::new(executor, Arc::new(workflow), RunnerConfig::default());
//! runner.resume_incomplete().await?;
//!
//! let handle = runner.spawn(workflow_id)?;
//!
//! // Graceful shutdown
//! runner.shutdown().await?;
//! ```

mod runner;

pub use runner::{RunHandle, RunnerConfig, RunnerError, WorkflowRunner};
