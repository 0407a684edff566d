//! CheckpointStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{WorkflowError, WorkflowEvent};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// A live (pending or running) instance already holds this dedup key
    #[error("a live workflow already exists for key '{key}': {existing}")]
    DuplicateKey { key: String, existing: Uuid },

    /// Concurrency conflict (optimistic locking failed)
    #[error("concurrency conflict: expected sequence {expected}, got {actual}")]
    ConcurrencyConflict { expected: i32, actual: i32 },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the operation may succeed if repeated (connection loss, pool
    /// exhaustion). Conflicts and missing instances never are.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Workflow instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, no step has run yet
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// Terminal instances release their dedup key
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Serialization(format!(
                "unknown workflow status: {other}"
            ))),
        }
    }
}

/// Workflow instance as stored
#[derive(Debug, Clone)]
pub struct WorkflowInfo {
    pub id: Uuid,
    pub workflow_type: String,
    pub dedup_key: Option<String>,
    pub status: WorkflowStatus,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<WorkflowError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Store for workflow instances and their checkpoint logs
///
/// Implementations must be thread-safe. `create_workflow` must enforce the
/// dedup key atomically: two concurrent creates with the same key may not
/// both succeed while either instance is live.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    // =========================================================================
    // Instance Operations
    // =========================================================================

    /// Create a pending instance.
    ///
    /// Fails with [`StoreError::DuplicateKey`] when `dedup_key` is held by a
    /// pending or running instance.
    async fn create_workflow(
        &self,
        workflow_id: Uuid,
        workflow_type: &str,
        dedup_key: Option<&str>,
        input: serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn get_workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, StoreError>;

    /// Live instance currently holding `dedup_key`, if any
    async fn find_live_by_key(&self, dedup_key: &str) -> Result<Option<Uuid>, StoreError>;

    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError>;

    /// Instances of `workflow_type` in any of `statuses`, oldest first
    async fn list_workflows(
        &self,
        workflow_type: &str,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<WorkflowInfo>, StoreError>;

    // =========================================================================
    // Checkpoint Log Operations
    // =========================================================================

    /// Append events with optimistic concurrency.
    ///
    /// Returns the next sequence number after appending.
    async fn append_events(
        &self,
        workflow_id: Uuid,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError>;

    /// All events for a workflow in sequence order (for replay)
    async fn load_events(&self, workflow_id: Uuid)
        -> Result<Vec<(i32, WorkflowEvent)>, StoreError>;
}
