// Collaborator contracts
//
// Decision: all collaborators are trait objects (Arc<dyn ...>) constructed in
// main and injected into the dispatcher and workflow; nothing is global.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::credit::{CreditAccount, DebitOutcome};
use crate::error::{LedgerError, ObjectStoreError, ProviderError, StoreError};
use crate::image::SourceImage;
use crate::job::{NewJob, RestorationJob};
use crate::restoration::{NewRestorationResult, RestorationResult};
use crate::usage::{NewUsageEntry, UsageLogEntry};

/// Job records. Transitions follow [`crate::JobStatus::transition_to`]: a
/// repeated transition returns the job unchanged.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: NewJob) -> Result<RestorationJob, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<RestorationJob>, StoreError>;

    /// pending → processing, recording `started_at`
    async fn mark_processing(
        &self,
        job_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<RestorationJob, StoreError>;

    /// processing → completed, recording `completed_at`
    async fn mark_completed(
        &self,
        job_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<RestorationJob, StoreError>;

    /// pending | processing → failed, recording the message
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
    ) -> Result<RestorationJob, StoreError>;
}

/// Insert-only restoration results
#[async_trait]
pub trait RestorationStore: Send + Sync {
    /// Insert unless a result for `result.job_id` exists; either way return
    /// the stored row.
    async fn insert_result(
        &self,
        result: NewRestorationResult,
    ) -> Result<RestorationResult, StoreError>;

    async fn get_result_for_job(
        &self,
        job_id: Uuid,
    ) -> Result<Option<RestorationResult>, StoreError>;

    async fn count_results_for_image(&self, image_id: &str) -> Result<i64, StoreError>;
}

/// Insert-only usage log
#[async_trait]
pub trait UsageLogStore: Send + Sync {
    /// Insert unless an entry for the same (job_id, action) exists; either
    /// way return the stored entry.
    async fn append_usage(&self, entry: NewUsageEntry) -> Result<UsageLogEntry, StoreError>;

    async fn usage_for_user(&self, user_id: &str) -> Result<Vec<UsageLogEntry>, StoreError>;
}

/// Read side of the upload collaborator's image records
#[async_trait]
pub trait SourceImageStore: Send + Sync {
    async fn get_image(&self, image_id: &str) -> Result<Option<SourceImage>, StoreError>;
}

/// Per-user credit balances
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn balance(&self, user_id: &str) -> Result<Option<CreditAccount>, LedgerError>;

    /// Decrement by one iff the balance is positive and `job_id` has not been
    /// charged yet. Atomic: concurrent debits for one user never overdraw.
    async fn debit_one(&self, user_id: &str, job_id: Uuid) -> Result<DebitOutcome, LedgerError>;

    /// Create the account with a full grant if it does not exist
    async fn open_account(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CreditAccount, LedgerError>;

    /// Refill to a full grant and move `reset_at` one period past `now`
    async fn topup(&self, user_id: &str, now: DateTime<Utc>)
        -> Result<CreditAccount, LedgerError>;
}

/// Blob storage for original and restored images
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, reference: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Write `bytes` under `key` (overwriting) and return the stored reference
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;
}

/// Input to a restoration call
#[derive(Debug, Clone, Copy)]
pub struct RestorationRequest<'a> {
    pub image: &'a [u8],
    pub content_type: &'a str,
    pub instruction: &'a str,
    /// Reference of the original, for adapters that do not transform
    pub original_ref: &'a str,
}

/// Successful restoration
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutput {
    /// New image bytes to be stored by the caller
    Restored { data: Vec<u8>, content_type: String },
    /// An existing object reference returned as the result
    Reference(String),
}

/// External restoration capability. A pure request/response boundary: no
/// business state is touched.
#[async_trait]
pub trait RestorationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn restore(
        &self,
        request: RestorationRequest<'_>,
    ) -> Result<ProviderOutput, ProviderError>;
}
