//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`CheckpointStore`] trait for instance and checkpoint persistence
//! - [`InMemoryCheckpointStore`] for tests and single-process dev runs
//! - [`PostgresCheckpointStore`] for production

#[cfg(test)]
pub(crate) mod flaky;
mod memory;
mod postgres;
mod store;

pub use memory::InMemoryCheckpointStore;
pub use postgres::PostgresCheckpointStore;
pub use store::{CheckpointStore, StoreError, WorkflowInfo, WorkflowStatus};
