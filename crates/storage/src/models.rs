// Database rows (internal; converted into timeglow-core types at the edge)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use timeglow_core::{
    CreditAccount, JobStatus, RestorationJob, RestorationResult, SourceImage, StoreError,
    UsageAction, UsageLogEntry,
};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub image_id: String,
    pub user_id: String,
    pub preset_id: String,
    pub status: String,
    pub reroll_number: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl TryFrom<JobRow> for RestorationJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(RestorationJob {
            id: row.id,
            image_id: row.image_id,
            user_id: row.user_id,
            preset_id: row.preset_id,
            status: row.status.parse::<JobStatus>()?,
            reroll_number: row.reroll_number,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RestorationRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub image_id: String,
    pub result_ref: String,
    pub reroll_number: i32,
    pub credits_used: i32,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl From<RestorationRow> for RestorationResult {
    fn from(row: RestorationRow) -> Self {
        RestorationResult {
            id: row.id,
            job_id: row.job_id,
            image_id: row.image_id,
            result_ref: row.result_ref,
            reroll_number: row.reroll_number,
            credits_used: row.credits_used,
            processing_time_ms: row.processing_time_ms,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UsageRow {
    pub id: Uuid,
    pub user_id: String,
    pub action: String,
    pub credits_consumed: i32,
    pub job_id: Option<Uuid>,
    pub metadata: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UsageRow> for UsageLogEntry {
    type Error = StoreError;

    fn try_from(row: UsageRow) -> Result<Self, Self::Error> {
        Ok(UsageLogEntry {
            id: row.id,
            user_id: row.user_id,
            action: row
                .action
                .parse::<UsageAction>()
                .map_err(StoreError::Serialization)?,
            credits_consumed: row.credits_consumed,
            job_id: row.job_id,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub id: String,
    pub user_id: String,
    pub original_ref: String,
    pub original_size_bytes: i64,
    pub content_type: String,
    pub preset_used: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ImageRow> for SourceImage {
    fn from(row: ImageRow) -> Self {
        SourceImage {
            id: row.id,
            user_id: row.user_id,
            original_ref: row.original_ref,
            original_size_bytes: row.original_size_bytes,
            content_type: row.content_type,
            preset_used: row.preset_used,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CreditAccountRow {
    pub user_id: String,
    pub credits_remaining: i32,
    pub reset_at: DateTime<Utc>,
    pub total_processed: i32,
}

impl From<CreditAccountRow> for CreditAccount {
    fn from(row: CreditAccountRow) -> Self {
        CreditAccount {
            user_id: row.user_id,
            credits_remaining: row.credits_remaining,
            reset_at: row.reset_at,
            total_processed: row.total_processed,
        }
    }
}
