use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored restoration output. Append-only: a reroll adds a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorationResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub image_id: String,
    pub result_ref: String,
    pub reroll_number: i32,
    pub credits_used: i32,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; `job_id` is the idempotency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRestorationResult {
    pub job_id: Uuid,
    pub image_id: String,
    pub result_ref: String,
    pub reroll_number: i32,
    pub credits_used: i32,
    pub processing_time_ms: i64,
}

impl NewRestorationResult {
    pub fn into_result(self, id: Uuid, created_at: DateTime<Utc>) -> RestorationResult {
        RestorationResult {
            id,
            job_id: self.job_id,
            image_id: self.image_id,
            result_ref: self.result_ref,
            reroll_number: self.reroll_number,
            credits_used: self.credits_used,
            processing_time_ms: self.processing_time_ms,
            created_at,
        }
    }
}
