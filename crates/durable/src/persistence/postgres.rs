//! PostgreSQL implementation of CheckpointStore
//!
//! - Optimistic concurrency control via sequence numbers
//! - Live dedup keys enforced by a partial unique index
//! - Event sourcing for step replay

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::workflow::{WorkflowError, WorkflowEvent};

/// Name of the partial unique index over live dedup keys
const LIVE_KEY_INDEX: &str = "durable_workflow_instances_live_dedup_key";

/// PostgreSQL implementation of CheckpointStore
///
/// Expects the `durable_workflow_instances` and `durable_workflow_events`
/// tables from the storage crate's migrations.
///
/// # Example
///
/// ```ignore
/// use timeglow_durable::PostgresCheckpointStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/timeglow").await?;
/// let store = PostgresCheckpointStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn row_to_info(row: &PgRow) -> Result<WorkflowInfo, StoreError> {
    let status: String = row.get("status");
    let error_json: Option<serde_json::Value> = row.get("error");
    let error = error_json
        .map(serde_json::from_value::<WorkflowError>)
        .transpose()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(WorkflowInfo {
        id: row.get("id"),
        workflow_type: row.get("workflow_type"),
        dedup_key: row.get("dedup_key"),
        status: status.parse()?,
        input: row.get("input"),
        result: row.get("result"),
        error,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    #[instrument(skip(self, input))]
    async fn create_workflow(
        &self,
        workflow_id: Uuid,
        workflow_type: &str,
        dedup_key: Option<&str>,
        input: serde_json::Value,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO durable_workflow_instances (id, workflow_type, dedup_key, status, input)
            VALUES ($1, $2, $3, 'pending', $4)
            "#,
        )
        .bind(workflow_id)
        .bind(workflow_type)
        .bind(dedup_key)
        .bind(&input)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(%workflow_id, %workflow_type, "created workflow");
                Ok(())
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some(LIVE_KEY_INDEX) =>
            {
                let key = dedup_key.unwrap_or_default();
                let existing = self
                    .find_live_by_key(key)
                    .await?
                    .unwrap_or_else(Uuid::nil);
                Err(StoreError::DuplicateKey {
                    key: key.to_string(),
                    existing,
                })
            }
            Err(e) => {
                error!("Failed to create workflow: {}", e);
                Err(db_error(e))
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_type, dedup_key, status, input, result, error, created_at, updated_at
            FROM durable_workflow_instances
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get workflow info: {}", e);
            db_error(e)
        })?
        .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        row_to_info(&row)
    }

    #[instrument(skip(self))]
    async fn find_live_by_key(&self, dedup_key: &str) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id FROM durable_workflow_instances
            WHERE dedup_key = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|r| r.get("id")))
    }

    #[instrument(skip(self, result, error))]
    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError> {
        let error_json = error
            .map(|e| serde_json::to_value(&e))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE durable_workflow_instances
            SET status = $2, result = $3, error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(status.as_str())
        .bind(&result)
        .bind(&error_json)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update workflow status: {}", e);
            db_error(e)
        })?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }

        debug!(%workflow_id, %status, "updated workflow status");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_workflows(
        &self,
        workflow_type: &str,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<WorkflowInfo>, StoreError> {
        let statuses: Vec<&str> = statuses.iter().map(WorkflowStatus::as_str).collect();

        let rows = sqlx::query(
            r#"
            SELECT id, workflow_type, dedup_key, status, input, result, error, created_at, updated_at
            FROM durable_workflow_instances
            WHERE workflow_type = $1 AND status = ANY($2)
            ORDER BY created_at, id
            "#,
        )
        .bind(workflow_type)
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_info).collect()
    }

    #[instrument(skip(self, events))]
    async fn append_events(
        &self,
        workflow_id: Uuid,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Row lock on the instance serializes appenders
        sqlx::query("SELECT id FROM durable_workflow_instances WHERE id = $1 FOR UPDATE")
            .bind(workflow_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(sequence_num) + 1, 0)::INT4 AS next_seq
            FROM durable_workflow_events
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        let current_sequence: i32 = row.get("next_seq");
        if current_sequence != expected_sequence {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence,
                actual: current_sequence,
            });
        }

        let mut new_sequence = current_sequence;
        for event in events {
            let event_data = serde_json::to_value(&event)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO durable_workflow_events (workflow_id, sequence_num, event_type, event_data)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(workflow_id)
            .bind(new_sequence)
            .bind(event.event_type())
            .bind(&event_data)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            new_sequence += 1;
        }

        sqlx::query("UPDATE durable_workflow_instances SET updated_at = NOW() WHERE id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        debug!(%workflow_id, new_sequence, "appended events");
        Ok(new_sequence)
    }

    #[instrument(skip(self))]
    async fn load_events(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence_num, event_data
            FROM durable_workflow_events
            WHERE workflow_id = $1
            ORDER BY sequence_num
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                let seq: i32 = row.get("sequence_num");
                let data: serde_json::Value = row.get("event_data");
                let event = serde_json::from_value(data)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok((seq, event))
            })
            .collect()
    }
}
