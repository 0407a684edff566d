//! In-memory implementation of CheckpointStore

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::workflow::{WorkflowError, WorkflowEvent};

struct WorkflowState {
    workflow_type: String,
    dedup_key: Option<String>,
    status: WorkflowStatus,
    input: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<WorkflowError>,
    events: Vec<WorkflowEvent>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowState {
    fn info(&self, id: Uuid) -> WorkflowInfo {
        WorkflowInfo {
            id,
            workflow_type: self.workflow_type.clone(),
            dedup_key: self.dedup_key.clone(),
            status: self.status,
            input: self.input.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn holds_key(&self, key: &str) -> bool {
        !self.status.is_terminal() && self.dedup_key.as_deref() == Some(key)
    }
}

/// In-memory implementation of CheckpointStore
///
/// Same semantics as the PostgreSQL store, including the live-key
/// constraint, which is checked and claimed under one write lock. State is
/// lost with the process, so nothing survives a restart.
///
/// # Example
///
/// ```
/// use timeglow_durable::InMemoryCheckpointStore;
///
/// let store = InMemoryCheckpointStore::new();
/// assert_eq!(store.workflow_count(), 0);
/// ```
pub struct InMemoryCheckpointStore {
    workflows: RwLock<HashMap<Uuid, WorkflowState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
        }
    }

    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    /// Events of one instance without sequence numbers (for assertions)
    pub fn events(&self, workflow_id: Uuid) -> Vec<WorkflowEvent> {
        self.workflows
            .read()
            .get(&workflow_id)
            .map(|w| w.events.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create_workflow(
        &self,
        workflow_id: Uuid,
        workflow_type: &str,
        dedup_key: Option<&str>,
        input: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();

        if let Some(key) = dedup_key {
            if let Some((existing, _)) = workflows.iter().find(|(_, w)| w.holds_key(key)) {
                return Err(StoreError::DuplicateKey {
                    key: key.to_string(),
                    existing: *existing,
                });
            }
        }

        let now = Utc::now();
        workflows.insert(
            workflow_id,
            WorkflowState {
                workflow_type: workflow_type.to_string(),
                dedup_key: dedup_key.map(str::to_string),
                status: WorkflowStatus::Pending,
                input,
                result: None,
                error: None,
                events: vec![],
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get_workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, StoreError> {
        let workflows = self.workflows.read();
        workflows
            .get(&workflow_id)
            .map(|w| w.info(workflow_id))
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn find_live_by_key(&self, dedup_key: &str) -> Result<Option<Uuid>, StoreError> {
        let workflows = self.workflows.read();
        Ok(workflows
            .iter()
            .find(|(_, w)| w.holds_key(dedup_key))
            .map(|(id, _)| *id))
    }

    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        workflow.status = status;
        workflow.result = result;
        workflow.error = error;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn list_workflows(
        &self,
        workflow_type: &str,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<WorkflowInfo>, StoreError> {
        let workflows = self.workflows.read();
        let mut matching: Vec<WorkflowInfo> = workflows
            .iter()
            .filter(|(_, w)| w.workflow_type == workflow_type && statuses.contains(&w.status))
            .map(|(id, w)| w.info(*id))
            .collect();
        matching.sort_by_key(|w| (w.created_at, w.id));
        Ok(matching)
    }

    async fn append_events(
        &self,
        workflow_id: Uuid,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        let current_sequence = workflow.events.len() as i32;
        if current_sequence != expected_sequence {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence,
                actual: current_sequence,
            });
        }

        workflow.events.extend(events);
        workflow.updated_at = Utc::now();
        Ok(workflow.events.len() as i32)
    }

    async fn load_events(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
        let workflows = self.workflows.read();
        let workflow = workflows
            .get(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        Ok(workflow
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (i as i32, e.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_and_get_workflow() {
        let store = InMemoryCheckpointStore::new();
        let id = Uuid::now_v7();

        store
            .create_workflow(id, "restore", Some("img-1"), json!({"a": 1}))
            .await
            .unwrap();

        let info = store.get_workflow_info(id).await.unwrap();
        assert_eq!(info.workflow_type, "restore");
        assert_eq!(info.dedup_key.as_deref(), Some("img-1"));
        assert_eq!(info.status, WorkflowStatus::Pending);
    }

    #[tokio::test]
    async fn test_live_key_rejects_second_instance() {
        let store = InMemoryCheckpointStore::new();
        let first = Uuid::now_v7();
        store
            .create_workflow(first, "restore", Some("img-1"), json!({}))
            .await
            .unwrap();

        let err = store
            .create_workflow(Uuid::now_v7(), "restore", Some("img-1"), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { existing, .. } if existing == first));
        assert_eq!(store.find_live_by_key("img-1").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_terminal_instance_releases_key() {
        let store = InMemoryCheckpointStore::new();
        let first = Uuid::now_v7();
        store
            .create_workflow(first, "restore", Some("img-1"), json!({}))
            .await
            .unwrap();
        store
            .update_workflow_status(first, WorkflowStatus::Failed, None, None)
            .await
            .unwrap();

        assert_eq!(store.find_live_by_key("img-1").await.unwrap(), None);
        store
            .create_workflow(Uuid::now_v7(), "restore", Some("img-1"), json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_creates_with_same_key() {
        let store = Arc::new(InMemoryCheckpointStore::new());

        let mut handles = vec![];
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_workflow(Uuid::now_v7(), "restore", Some("img-1"), json!({}))
                    .await
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_append_events_checks_sequence() {
        let store = InMemoryCheckpointStore::new();
        let id = Uuid::now_v7();
        store.create_workflow(id, "t", None, json!({})).await.unwrap();

        let seq = store
            .append_events(id, 0, vec![WorkflowEvent::WorkflowStarted { input: json!({}) }])
            .await
            .unwrap();
        assert_eq!(seq, 1);

        let err = store
            .append_events(id, 0, vec![WorkflowEvent::CompensationCompleted])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::ConcurrencyConflict {
                expected: 0,
                actual: 1
            }
        ));

        let events = store.load_events(id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 0);
    }

    #[tokio::test]
    async fn test_list_workflows_filters_type_and_status() {
        let store = InMemoryCheckpointStore::new();
        let running = Uuid::now_v7();
        let done = Uuid::now_v7();
        let other = Uuid::now_v7();

        store.create_workflow(running, "restore", None, json!({})).await.unwrap();
        store.create_workflow(done, "restore", None, json!({})).await.unwrap();
        store.create_workflow(other, "other", None, json!({})).await.unwrap();
        store
            .update_workflow_status(running, WorkflowStatus::Running, None, None)
            .await
            .unwrap();
        store
            .update_workflow_status(done, WorkflowStatus::Completed, Some(json!({})), None)
            .await
            .unwrap();

        let live = store
            .list_workflows("restore", &[WorkflowStatus::Pending, WorkflowStatus::Running])
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, running);
    }
}
