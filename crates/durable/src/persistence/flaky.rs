//! Checkpoint store that drops chosen calls, for exercising store outages

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::store::*;
use super::InMemoryCheckpointStore;
use crate::workflow::{WorkflowError, WorkflowEvent};

fn outage() -> StoreError {
    StoreError::Database("connection reset by peer".to_string())
}

/// How a scripted append failure behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LostAppend {
    /// Nothing is written
    Rejected,
    /// The events are written, the acknowledgement is lost
    Applied,
}

#[derive(Default)]
pub(crate) struct FlakyCheckpointStore {
    pub inner: InMemoryCheckpointStore,
    appends: AtomicUsize,
    failing_appends: Mutex<HashMap<usize, LostAppend>>,
    failing_loads: AtomicUsize,
    failing_status_updates: AtomicUsize,
}

impl FlakyCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` append call (1-based, counted across instances)
    pub fn fail_append(&self, nth: usize, mode: LostAppend) {
        self.failing_appends.lock().insert(nth, mode);
    }

    /// Fail the next `count` `load_events` calls
    pub fn fail_loads(&self, count: usize) {
        self.failing_loads.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` `update_workflow_status` calls
    pub fn fail_status_updates(&self, count: usize) {
        self.failing_status_updates.store(count, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CheckpointStore for FlakyCheckpointStore {
    async fn create_workflow(
        &self,
        workflow_id: Uuid,
        workflow_type: &str,
        dedup_key: Option<&str>,
        input: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.inner
            .create_workflow(workflow_id, workflow_type, dedup_key, input)
            .await
    }

    async fn get_workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, StoreError> {
        self.inner.get_workflow_info(workflow_id).await
    }

    async fn find_live_by_key(&self, dedup_key: &str) -> Result<Option<Uuid>, StoreError> {
        self.inner.find_live_by_key(dedup_key).await
    }

    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError> {
        if Self::take(&self.failing_status_updates) {
            return Err(outage());
        }
        self.inner
            .update_workflow_status(workflow_id, status, result, error)
            .await
    }

    async fn list_workflows(
        &self,
        workflow_type: &str,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<WorkflowInfo>, StoreError> {
        self.inner.list_workflows(workflow_type, statuses).await
    }

    async fn append_events(
        &self,
        workflow_id: Uuid,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError> {
        let call = self.appends.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.failing_appends.lock().remove(&call);
        match scripted {
            Some(LostAppend::Rejected) => Err(outage()),
            Some(LostAppend::Applied) => {
                self.inner
                    .append_events(workflow_id, expected_sequence, events)
                    .await?;
                Err(outage())
            }
            None => {
                self.inner
                    .append_events(workflow_id, expected_sequence, events)
                    .await
            }
        }
    }

    async fn load_events(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
        if Self::take(&self.failing_loads) {
            return Err(outage());
        }
        self.inner.load_events(workflow_id).await
    }
}
