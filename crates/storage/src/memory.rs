//! In-memory state store and credit ledger
//!
//! One mutex guards every table, so each trait call is atomic with respect to
//! every other. Semantics match [`crate::PgStore`]: conditional status
//! transitions, insert-if-absent results and usage entries, and a debit that
//! checks the job's charge marker and the balance in the same critical
//! section.
//!
//! [`FailPoint`]s make selected operations return a transient database error
//! a fixed number of times, for exercising step retries.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use timeglow_core::{
    CreditAccount, CreditLedger, CreditPolicy, DebitOutcome, JobStatus, JobStore, LedgerError,
    NewJob, NewRestorationResult, NewUsageEntry, RestorationJob, RestorationResult,
    RestorationStore, SourceImage, SourceImageStore, StoreError, UsageLogEntry, UsageLogStore,
};
use tracing::debug;
use uuid::Uuid;

/// Operations that can be made to fail transiently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateJob,
    MarkProcessing,
    MarkCompleted,
    MarkFailed,
    InsertResult,
    AppendUsage,
    Debit,
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, RestorationJob>,
    /// Keyed by job id
    results: HashMap<Uuid, RestorationResult>,
    usage: Vec<UsageLogEntry>,
    images: HashMap<String, SourceImage>,
    accounts: HashMap<String, CreditAccount>,
    charges: HashSet<Uuid>,
    failures: HashMap<FailPoint, u32>,
}

impl Tables {
    fn trip(&mut self, point: FailPoint) -> Result<(), StoreError> {
        match self.failures.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Database(format!("injected failure at {point:?}")))
            }
            _ => Ok(()),
        }
    }

    fn transition(
        &mut self,
        job_id: Uuid,
        next: JobStatus,
        apply: impl FnOnce(&mut RestorationJob),
    ) -> Result<RestorationJob, StoreError> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::not_found("job", job_id))?;

        if job.status.transition_to(next)? {
            job.status = next;
            apply(job);
        } else {
            debug!(%job_id, status = %next, "job already in target status");
        }
        Ok(job.clone())
    }
}

/// Process-local implementation of every state collaborator
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    policy: CreditPolicy,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_policy(CreditPolicy::default())
    }

    pub fn with_policy(policy: CreditPolicy) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            policy,
        }
    }

    /// Record an uploaded original (the upload collaborator's write)
    pub fn insert_image(&self, image: SourceImage) {
        self.tables.lock().images.insert(image.id.clone(), image);
    }

    /// Create or overwrite an account with the given balance
    pub fn set_balance(&self, user_id: &str, credits_remaining: i32) {
        let now = Utc::now();
        let mut tables = self.tables.lock();
        let account = tables
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| self.policy.fresh_account(user_id, now));
        account.credits_remaining = credits_remaining;
    }

    /// Fail the next `times` calls of `point` with a database error
    pub fn fail_next(&self, point: FailPoint, times: u32) {
        self.tables.lock().failures.insert(point, times);
    }

    pub fn job_count(&self) -> usize {
        self.tables.lock().jobs.len()
    }

    pub fn results_for_image(&self, image_id: &str) -> Vec<RestorationResult> {
        let tables = self.tables.lock();
        let mut results: Vec<_> = tables
            .results
            .values()
            .filter(|r| r.image_id == image_id)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.reroll_number);
        results
    }

    pub fn usage_for_job(&self, job_id: Uuid) -> Vec<UsageLogEntry> {
        self.tables
            .lock()
            .usage
            .iter()
            .filter(|e| e.job_id == Some(job_id))
            .cloned()
            .collect()
    }

    pub fn is_charged(&self, job_id: Uuid) -> bool {
        self.tables.lock().charges.contains(&job_id)
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create_job(&self, job: NewJob) -> Result<RestorationJob, StoreError> {
        let mut tables = self.tables.lock();
        tables.trip(FailPoint::CreateJob)?;

        if let Some(existing) = tables.jobs.get(&job.id) {
            return Ok(existing.clone());
        }
        let job = job.into_job(Utc::now());
        tables.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<RestorationJob>, StoreError> {
        Ok(self.tables.lock().jobs.get(&job_id).cloned())
    }

    async fn mark_processing(
        &self,
        job_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<RestorationJob, StoreError> {
        let mut tables = self.tables.lock();
        tables.trip(FailPoint::MarkProcessing)?;
        tables.transition(job_id, JobStatus::Processing, |job| {
            job.started_at = Some(at);
        })
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<RestorationJob, StoreError> {
        let mut tables = self.tables.lock();
        tables.trip(FailPoint::MarkCompleted)?;
        tables.transition(job_id, JobStatus::Completed, |job| {
            job.completed_at = Some(at);
        })
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
    ) -> Result<RestorationJob, StoreError> {
        let mut tables = self.tables.lock();
        tables.trip(FailPoint::MarkFailed)?;
        tables.transition(job_id, JobStatus::Failed, |job| {
            job.error_message = Some(error_message.to_string());
            job.completed_at = Some(Utc::now());
        })
    }
}

#[async_trait]
impl RestorationStore for InMemoryStore {
    async fn insert_result(
        &self,
        result: NewRestorationResult,
    ) -> Result<RestorationResult, StoreError> {
        let mut tables = self.tables.lock();
        tables.trip(FailPoint::InsertResult)?;

        let stored = tables
            .results
            .entry(result.job_id)
            .or_insert_with(|| result.into_result(Uuid::now_v7(), Utc::now()));
        Ok(stored.clone())
    }

    async fn get_result_for_job(
        &self,
        job_id: Uuid,
    ) -> Result<Option<RestorationResult>, StoreError> {
        Ok(self.tables.lock().results.get(&job_id).cloned())
    }

    async fn count_results_for_image(&self, image_id: &str) -> Result<i64, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .results
            .values()
            .filter(|r| r.image_id == image_id)
            .count() as i64)
    }
}

#[async_trait]
impl UsageLogStore for InMemoryStore {
    async fn append_usage(&self, entry: NewUsageEntry) -> Result<UsageLogEntry, StoreError> {
        let mut tables = self.tables.lock();
        tables.trip(FailPoint::AppendUsage)?;

        if let Some(job_id) = entry.job_id {
            if let Some(existing) = tables
                .usage
                .iter()
                .find(|e| e.job_id == Some(job_id) && e.action == entry.action)
            {
                return Ok(existing.clone());
            }
        }

        let stored = entry.into_entry(Uuid::now_v7(), Utc::now());
        tables.usage.push(stored.clone());
        Ok(stored)
    }

    async fn usage_for_user(&self, user_id: &str) -> Result<Vec<UsageLogEntry>, StoreError> {
        Ok(self
            .tables
            .lock()
            .usage
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SourceImageStore for InMemoryStore {
    async fn get_image(&self, image_id: &str) -> Result<Option<SourceImage>, StoreError> {
        Ok(self.tables.lock().images.get(image_id).cloned())
    }
}

#[async_trait]
impl CreditLedger for InMemoryStore {
    async fn balance(&self, user_id: &str) -> Result<Option<CreditAccount>, LedgerError> {
        Ok(self.tables.lock().accounts.get(user_id).cloned())
    }

    async fn debit_one(&self, user_id: &str, job_id: Uuid) -> Result<DebitOutcome, LedgerError> {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;
        tables.trip(FailPoint::Debit)?;

        let account = tables
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))?;

        if tables.charges.contains(&job_id) {
            return Ok(DebitOutcome::AlreadyCharged {
                credits_remaining: account.credits_remaining,
            });
        }
        if account.credits_remaining <= 0 {
            return Err(LedgerError::InsufficientCredit {
                user_id: user_id.to_string(),
            });
        }

        account.credits_remaining -= 1;
        account.total_processed += 1;
        tables.charges.insert(job_id);

        Ok(DebitOutcome::Charged {
            credits_remaining: account.credits_remaining,
        })
    }

    async fn open_account(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CreditAccount, LedgerError> {
        let mut tables = self.tables.lock();
        let account = tables
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| self.policy.fresh_account(user_id, now));
        Ok(account.clone())
    }

    async fn topup(&self, user_id: &str, now: DateTime<Utc>) -> Result<CreditAccount, LedgerError> {
        let mut tables = self.tables.lock();
        let account = tables
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| self.policy.fresh_account(user_id, now));
        account.credits_remaining = self.policy.credits_per_period;
        account.reset_at = self.policy.reset_at(now);
        Ok(account.clone())
    }
}
