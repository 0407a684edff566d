// PostgreSQL implementation of the state store
//
// Status transitions are single conditional UPDATEs; when the guard does not
// match, the current row decides between a replayed no-op and an invalid
// transition. Inserts are idempotent on their natural keys via ON CONFLICT.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use timeglow_core::{
    JobStatus, JobStore, NewJob, NewRestorationResult, NewUsageEntry, RestorationJob,
    RestorationResult, RestorationStore, SourceImage, SourceImageStore, StoreError,
    UsageLogEntry, UsageLogStore,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::models::{ImageRow, JobRow, RestorationRow, UsageRow};

const JOB_COLUMNS: &str = "id, image_id, user_id, preset_id, status, reroll_number, \
     created_at, started_at, completed_at, error_message";

/// State store, credit ledger and image index over one pool
#[derive(Clone)]
pub struct PgStore {
    pub(crate) pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Record an uploaded original (the upload collaborator's write)
    pub async fn insert_image(&self, image: &SourceImage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO images (id, user_id, original_ref, original_size_bytes, content_type, preset_used, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&image.id)
        .bind(&image.user_id)
        .bind(&image.original_ref)
        .bind(image.original_size_bytes)
        .bind(&image.content_type)
        .bind(&image.preset_used)
        .bind(image.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<RestorationJob>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM restoration_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(RestorationJob::try_from).transpose()
    }

    /// Resolve a conditional UPDATE that matched no row
    async fn settle_unmatched(
        &self,
        job_id: Uuid,
        next: JobStatus,
    ) -> Result<RestorationJob, StoreError> {
        let job = self
            .fetch_job(job_id)
            .await?
            .ok_or_else(|| StoreError::not_found("job", job_id))?;

        if job.status.transition_to(next)? {
            // The guard rejected a transition that the current row allows:
            // another writer moved the job between the two statements.
            warn!(%job_id, from = %job.status, to = %next, "job status changed concurrently");
            return Err(StoreError::Database(format!(
                "job {job_id} changed status concurrently"
            )));
        }
        debug!(%job_id, status = %next, "job already in target status");
        Ok(job)
    }

    async fn transition(
        &self,
        job_id: Uuid,
        next: JobStatus,
        set_clause: &str,
        arg: TransitionArg<'_>,
    ) -> Result<RestorationJob, StoreError> {
        let from: Vec<String> = next
            .allowed_from()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let sql = format!(
            "UPDATE restoration_jobs SET status = $2, {set_clause} \
             WHERE id = $1 AND status = ANY($3) RETURNING {JOB_COLUMNS}"
        );
        let query = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .bind(next.as_str())
            .bind(&from);
        let query = match arg {
            TransitionArg::At(at) => query.bind(at),
            TransitionArg::Message(message) => query.bind(message),
        };

        match query.fetch_optional(&self.pool).await.map_err(db_error)? {
            Some(row) => RestorationJob::try_from(row),
            None => self.settle_unmatched(job_id, next).await,
        }
    }
}

enum TransitionArg<'a> {
    At(DateTime<Utc>),
    Message(&'a str),
}

pub(crate) fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl JobStore for PgStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create_job(&self, job: NewJob) -> Result<RestorationJob, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO restoration_jobs (id, image_id, user_id, preset_id, status, reroll_number)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(&job.image_id)
        .bind(&job.user_id)
        .bind(&job.preset_id)
        .bind(job.reroll_number)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        RestorationJob::try_from(row)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<RestorationJob>, StoreError> {
        self.fetch_job(job_id).await
    }

    #[instrument(skip(self))]
    async fn mark_processing(
        &self,
        job_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<RestorationJob, StoreError> {
        self.transition(
            job_id,
            JobStatus::Processing,
            "started_at = $4",
            TransitionArg::At(at),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn mark_completed(
        &self,
        job_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<RestorationJob, StoreError> {
        self.transition(
            job_id,
            JobStatus::Completed,
            "completed_at = $4",
            TransitionArg::At(at),
        )
        .await
    }

    #[instrument(skip(self, error_message))]
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
    ) -> Result<RestorationJob, StoreError> {
        self.transition(
            job_id,
            JobStatus::Failed,
            "error_message = $4, completed_at = NOW()",
            TransitionArg::Message(error_message),
        )
        .await
    }
}

#[async_trait]
impl RestorationStore for PgStore {
    #[instrument(skip(self, result), fields(job_id = %result.job_id))]
    async fn insert_result(
        &self,
        result: NewRestorationResult,
    ) -> Result<RestorationResult, StoreError> {
        let inserted = sqlx::query_as::<_, RestorationRow>(
            r#"
            INSERT INTO restorations (id, job_id, image_id, result_ref, reroll_number, credits_used, processing_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_id) DO NOTHING
            RETURNING id, job_id, image_id, result_ref, reroll_number, credits_used, processing_time_ms, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(result.job_id)
        .bind(&result.image_id)
        .bind(&result.result_ref)
        .bind(result.reroll_number)
        .bind(result.credits_used)
        .bind(result.processing_time_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        debug!(job_id = %result.job_id, "result already stored");
        self.get_result_for_job(result.job_id)
            .await?
            .ok_or_else(|| StoreError::not_found("restoration", result.job_id))
    }

    async fn get_result_for_job(
        &self,
        job_id: Uuid,
    ) -> Result<Option<RestorationResult>, StoreError> {
        let row = sqlx::query_as::<_, RestorationRow>(
            r#"
            SELECT id, job_id, image_id, result_ref, reroll_number, credits_used, processing_time_ms, created_at
            FROM restorations
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn count_results_for_image(&self, image_id: &str) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM restorations WHERE image_id = $1")
            .bind(image_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }
}

#[async_trait]
impl UsageLogStore for PgStore {
    #[instrument(skip(self, entry), fields(user_id = %entry.user_id, action = %entry.action))]
    async fn append_usage(&self, entry: NewUsageEntry) -> Result<UsageLogEntry, StoreError> {
        let inserted = sqlx::query_as::<_, UsageRow>(
            r#"
            INSERT INTO usage_logs (id, user_id, action, credits_consumed, job_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (job_id, action) WHERE job_id IS NOT NULL DO NOTHING
            RETURNING id, user_id, action, credits_consumed, job_id, metadata, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.credits_consumed)
        .bind(entry.job_id)
        .bind(&entry.metadata)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some(row) = inserted {
            return UsageLogEntry::try_from(row);
        }

        // Only a keyed entry can conflict
        let job_id = entry
            .job_id
            .ok_or_else(|| StoreError::Database("usage insert returned no row".into()))?;
        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT id, user_id, action, credits_consumed, job_id, metadata, created_at
            FROM usage_logs
            WHERE job_id = $1 AND action = $2
            "#,
        )
        .bind(job_id)
        .bind(entry.action.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        UsageLogEntry::try_from(row)
    }

    async fn usage_for_user(&self, user_id: &str) -> Result<Vec<UsageLogEntry>, StoreError> {
        let rows = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT id, user_id, action, credits_consumed, job_id, metadata, created_at
            FROM usage_logs
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(UsageLogEntry::try_from).collect()
    }
}

#[async_trait]
impl SourceImageStore for PgStore {
    async fn get_image(&self, image_id: &str) -> Result<Option<SourceImage>, StoreError> {
        let row = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT id, user_id, original_ref, original_size_bytes, content_type, preset_used, created_at
            FROM images
            WHERE id = $1
            "#,
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }
}
