// Restoration Workflow
//
// The checkpointed step sequence for one job:
// 1. mark_processing   pending → processing, record start time
// 2. load_job_details  job + source image record
// 3. resolve_preset    instruction text (unknown preset is terminal)
// 4. invoke_provider   restoration call; restored bytes go to the object store
// 5. persist_result    one result row per job
// 6. mark_completed    processing → completed
// 7. debit_credit      atomic conditional debit, guarded by the job's charge marker
// 8. log_usage         restore/reroll usage entry
//
// Any terminal failure runs `mark_failed` as compensation. Every step is safe
// to re-run after its effect was applied: transitions are no-ops when already
// taken, and result/debit/usage writes are keyed by job id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use timeglow_core::{
    CreditLedger, DebitOutcome, JobStatus, JobStore, LedgerError, NewRestorationResult,
    NewUsageEntry, ObjectStore, ObjectStoreError, PipelineConfig, PresetCatalog, ProviderError,
    ProviderOutput, RestorationJob, RestorationProvider, RestorationRequest, RestorationStore,
    SourceImage, SourceImageStore, StoreError, UsageAction, UsageLogStore,
};
use timeglow_durable::{
    CheckpointStore, RetryPolicy, StepContext, StepError, StepOptions, Workflow, WorkflowError,
    WorkflowRunner,
};
use timeglow_storage::extension_for_content_type;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// Step Names
// ============================================================================

pub mod steps {
    pub const MARK_PROCESSING: &str = "mark_processing";
    pub const LOAD_JOB_DETAILS: &str = "load_job_details";
    pub const RESOLVE_PRESET: &str = "resolve_preset";
    pub const INVOKE_PROVIDER: &str = "invoke_provider";
    pub const PERSIST_RESULT: &str = "persist_result";
    pub const MARK_COMPLETED: &str = "mark_completed";
    pub const DEBIT_CREDIT: &str = "debit_credit";
    pub const LOG_USAGE: &str = "log_usage";

    pub const ALL: &[&str] = &[
        MARK_PROCESSING,
        LOAD_JOB_DETAILS,
        RESOLVE_PRESET,
        INVOKE_PROVIDER,
        PERSIST_RESULT,
        MARK_COMPLETED,
        DEBIT_CREDIT,
        LOG_USAGE,
    ];
}

use steps::*;

/// Credits charged for one successful restoration
pub const CREDITS_PER_RESTORATION: i32 = 1;

// ============================================================================
// Input/Output Types
// ============================================================================

/// Workflow input, recorded with the instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorationInput {
    pub job_id: Uuid,
    pub image_id: String,
    pub user_id: String,
    pub preset_id: String,
}

/// Output of `mark_processing`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStarted {
    pub started_at: DateTime<Utc>,
}

/// Output of `load_job_details`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetails {
    pub job: RestorationJob,
    pub image: SourceImage,
}

/// Output of `resolve_preset`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedPreset {
    pub preset_id: String,
    pub instruction: String,
}

/// Output of `invoke_provider`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub result_ref: String,
    pub provider: String,
    /// The provider returned the original instead of new bytes
    pub passthrough: bool,
    pub provider_ms: i64,
}

/// Output of `mark_completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingCompleted {
    pub completed_at: DateTime<Utc>,
}

// ============================================================================
// Settings and Collaborators
// ============================================================================

/// Retry ceilings, backoff and the provider's per-attempt timeout
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    pub provider_max_retries: u32,
    pub provider_timeout: Duration,
    pub step_max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            provider_max_retries: 3,
            provider_timeout: Duration::from_secs(30),
            step_max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl WorkflowSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            provider_max_retries: config.provider_max_retries,
            provider_timeout: config.provider_timeout,
            step_max_retries: config.step_max_retries,
            initial_backoff: config.retry_initial_backoff,
            max_backoff: config.retry_max_backoff,
        }
    }

    fn backoff(&self, retries: u32) -> RetryPolicy {
        RetryPolicy::with_retries(retries)
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
    }

    pub fn provider_options(&self) -> StepOptions {
        StepOptions::new(self.backoff(self.provider_max_retries))
            .with_attempt_timeout(self.provider_timeout)
    }

    pub fn persistence_options(&self) -> StepOptions {
        StepOptions::new(self.backoff(self.step_max_retries))
    }

    /// Retries for checkpoint writes, on the same schedule as persistence steps
    pub fn checkpoint_retry(&self) -> RetryPolicy {
        self.backoff(self.step_max_retries)
    }
}

/// Everything the workflow and dispatcher talk to, injected at startup
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobStore>,
    pub results: Arc<dyn RestorationStore>,
    pub usage: Arc<dyn UsageLogStore>,
    pub images: Arc<dyn SourceImageStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub objects: Arc<dyn ObjectStore>,
    pub provider: Arc<dyn RestorationProvider>,
}

impl Collaborators {
    /// One store serving every state contract
    pub fn with_store<T>(
        store: Arc<T>,
        ledger: Arc<dyn CreditLedger>,
        objects: Arc<dyn ObjectStore>,
        provider: Arc<dyn RestorationProvider>,
    ) -> Self
    where
        T: JobStore + RestorationStore + UsageLogStore + SourceImageStore + 'static,
    {
        Self {
            jobs: store.clone(),
            results: store.clone(),
            usage: store.clone(),
            images: store,
            ledger,
            objects,
            provider,
        }
    }
}

/// Runner over a type-erased checkpoint store
pub type PipelineRunner = WorkflowRunner<RestorationWorkflow, dyn CheckpointStore>;

// ============================================================================
// Error Mapping
// ============================================================================

fn store_error(e: StoreError) -> StepError {
    let step_error = if e.is_retryable() {
        StepError::retryable(e.to_string())
    } else {
        StepError::terminal(e.to_string())
    };
    step_error.with_type(e.code())
}

fn provider_error(e: ProviderError) -> StepError {
    let step_error = if e.is_retryable() {
        StepError::retryable(e.to_string())
    } else {
        StepError::terminal(e.to_string())
    };
    step_error.with_type(e.code())
}

fn object_error(e: ObjectStoreError) -> StepError {
    let step_error = if e.is_retryable() {
        StepError::retryable(e.to_string())
    } else {
        StepError::terminal(e.to_string())
    };
    step_error.with_type(e.code())
}

fn ledger_error(e: LedgerError) -> StepError {
    let step_error = if e.is_retryable() {
        StepError::retryable(e.to_string())
    } else {
        StepError::terminal(e.to_string())
    };
    step_error.with_type(e.code())
}

fn to_output<T: Serialize>(value: &T) -> Result<serde_json::Value, StepError> {
    Ok(serde_json::to_value(value)?)
}

// ============================================================================
// Workflow Implementation
// ============================================================================

/// Drives one restoration job to `completed` or `failed`
pub struct RestorationWorkflow {
    collaborators: Collaborators,
    catalog: PresetCatalog,
    settings: WorkflowSettings,
}

impl RestorationWorkflow {
    pub fn new(collaborators: Collaborators, settings: WorkflowSettings) -> Self {
        Self {
            collaborators,
            catalog: PresetCatalog::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    async fn mark_processing(
        &self,
        input: &RestorationInput,
    ) -> Result<ProcessingStarted, StepError> {
        let job = self
            .collaborators
            .jobs
            .mark_processing(input.job_id, Utc::now())
            .await
            .map_err(store_error)?;

        Ok(ProcessingStarted {
            started_at: job.started_at.unwrap_or_else(Utc::now),
        })
    }

    async fn load_job_details(&self, input: &RestorationInput) -> Result<JobDetails, StepError> {
        let job = self
            .collaborators
            .jobs
            .get_job(input.job_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| store_error(StoreError::not_found("job", input.job_id)))?;

        let image = self
            .collaborators
            .images
            .get_image(&job.image_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| store_error(StoreError::not_found("image", &job.image_id)))?;

        Ok(JobDetails { job, image })
    }

    fn resolve_preset(&self, details: &JobDetails) -> Result<ResolvedPreset, StepError> {
        let preset_id = &details.job.preset_id;
        let instruction = self.catalog.instruction(preset_id).ok_or_else(|| {
            StepError::terminal(format!("unknown preset: {preset_id}")).with_type("INVALID_PRESET")
        })?;

        Ok(ResolvedPreset {
            preset_id: preset_id.clone(),
            instruction: instruction.to_string(),
        })
    }

    async fn invoke_provider(
        &self,
        details: &JobDetails,
        preset: &ResolvedPreset,
    ) -> Result<ProviderResult, StepError> {
        let image = &details.image;
        let original = self
            .collaborators
            .objects
            .get(&image.original_ref)
            .await
            .map_err(object_error)?;

        let provider = &self.collaborators.provider;
        let started = tokio::time::Instant::now();
        let output = provider
            .restore(RestorationRequest {
                image: &original,
                content_type: &image.content_type,
                instruction: &preset.instruction,
                original_ref: &image.original_ref,
            })
            .await
            .map_err(provider_error)?;
        let provider_ms = started.elapsed().as_millis() as i64;

        let (result_ref, passthrough) = match output {
            ProviderOutput::Restored { data, content_type } => {
                let key = format!(
                    "restored/{}/{}/{}.{}",
                    details.job.user_id,
                    details.job.image_id,
                    details.job.id,
                    extension_for_content_type(&content_type)
                );
                let reference = self
                    .collaborators
                    .objects
                    .put(&key, data, &content_type)
                    .await
                    .map_err(object_error)?;
                (reference, false)
            }
            ProviderOutput::Reference(reference) => (reference, true),
        };

        Ok(ProviderResult {
            result_ref,
            provider: provider.name().to_string(),
            passthrough,
            provider_ms,
        })
    }

    async fn persist_result(&self, ctx: &StepContext<'_>) -> Result<serde_json::Value, StepError> {
        let started: ProcessingStarted = ctx.output(MARK_PROCESSING)?;
        let details: JobDetails = ctx.output(LOAD_JOB_DETAILS)?;
        let provider: ProviderResult = ctx.output(INVOKE_PROVIDER)?;

        let processing_time_ms = (Utc::now() - started.started_at).num_milliseconds().max(0);
        let result = self
            .collaborators
            .results
            .insert_result(NewRestorationResult {
                job_id: details.job.id,
                image_id: details.job.image_id.clone(),
                result_ref: provider.result_ref,
                reroll_number: details.job.reroll_number,
                credits_used: CREDITS_PER_RESTORATION,
                processing_time_ms,
            })
            .await
            .map_err(store_error)?;

        to_output(&result)
    }

    async fn mark_completed(
        &self,
        input: &RestorationInput,
    ) -> Result<ProcessingCompleted, StepError> {
        let job = self
            .collaborators
            .jobs
            .mark_completed(input.job_id, Utc::now())
            .await
            .map_err(store_error)?;

        Ok(ProcessingCompleted {
            completed_at: job.completed_at.unwrap_or_else(Utc::now),
        })
    }

    async fn debit_credit(&self, input: &RestorationInput) -> Result<DebitOutcome, StepError> {
        match self
            .collaborators
            .ledger
            .debit_one(&input.user_id, input.job_id)
            .await
        {
            Ok(outcome) => {
                if let DebitOutcome::AlreadyCharged { .. } = outcome {
                    info!(job_id = %input.job_id, "credit already charged for job");
                }
                Ok(outcome)
            }
            Err(e @ LedgerError::InsufficientCredit { .. }) => {
                // The balance was drained by another job between dispatch and
                // completion. The job stays completed; nothing is charged.
                warn!(
                    job_id = %input.job_id,
                    user_id = %input.user_id,
                    "balance exhausted after completion, restoration not charged"
                );
                Err(ledger_error(e))
            }
            Err(e) => Err(ledger_error(e)),
        }
    }

    async fn log_usage(&self, ctx: &StepContext<'_>) -> Result<serde_json::Value, StepError> {
        let details: JobDetails = ctx.output(LOAD_JOB_DETAILS)?;
        let provider: ProviderResult = ctx.output(INVOKE_PROVIDER)?;
        let job = &details.job;

        let entry = self
            .collaborators
            .usage
            .append_usage(NewUsageEntry {
                user_id: job.user_id.clone(),
                action: UsageAction::for_reroll_number(job.reroll_number),
                credits_consumed: CREDITS_PER_RESTORATION,
                job_id: Some(job.id),
                metadata: json!({
                    "preset": job.preset_id,
                    "image_id": job.image_id,
                    "reroll_number": job.reroll_number,
                    "result_ref": provider.result_ref,
                    "provider": provider.provider,
                }),
            })
            .await
            .map_err(store_error)?;

        to_output(&entry)
    }
}

#[async_trait]
impl Workflow for RestorationWorkflow {
    const TYPE: &'static str = "photo_restoration";
    type Input = RestorationInput;

    fn steps(&self) -> &'static [&'static str] {
        ALL
    }

    fn step_options(&self, step_id: &str) -> StepOptions {
        match step_id {
            INVOKE_PROVIDER => self.settings.provider_options(),
            RESOLVE_PRESET => StepOptions::once(),
            _ => self.settings.persistence_options(),
        }
    }

    async fn execute_step(
        &self,
        ctx: &StepContext<'_>,
        input: &Self::Input,
    ) -> Result<serde_json::Value, StepError> {
        match ctx.step_id {
            MARK_PROCESSING => to_output(&self.mark_processing(input).await?),
            LOAD_JOB_DETAILS => to_output(&self.load_job_details(input).await?),
            RESOLVE_PRESET => {
                let details: JobDetails = ctx.output(LOAD_JOB_DETAILS)?;
                to_output(&self.resolve_preset(&details)?)
            }
            INVOKE_PROVIDER => {
                let details: JobDetails = ctx.output(LOAD_JOB_DETAILS)?;
                let preset: ResolvedPreset = ctx.output(RESOLVE_PRESET)?;
                to_output(&self.invoke_provider(&details, &preset).await?)
            }
            PERSIST_RESULT => self.persist_result(ctx).await,
            MARK_COMPLETED => to_output(&self.mark_completed(input).await?),
            DEBIT_CREDIT => to_output(&self.debit_credit(input).await?),
            LOG_USAGE => self.log_usage(ctx).await,
            other => {
                Err(StepError::terminal(format!("unknown step: {other}")).with_type("UNKNOWN_STEP"))
            }
        }
    }

    /// mark_failed: record the error and move the job to `failed`
    async fn compensate(
        &self,
        _ctx: &StepContext<'_>,
        input: &Self::Input,
        error: &WorkflowError,
    ) -> Result<(), StepError> {
        match self
            .collaborators
            .jobs
            .mark_failed(input.job_id, &error.message)
            .await
        {
            Ok(job) => {
                info!(job_id = %job.id, error = %error, "job marked failed");
                Ok(())
            }
            Err(StoreError::InvalidTransition {
                from: JobStatus::Completed,
                ..
            }) => {
                warn!(
                    job_id = %input.job_id,
                    error = %error,
                    "job already completed, left unchanged"
                );
                Ok(())
            }
            Err(StoreError::NotFound { .. }) => {
                warn!(job_id = %input.job_id, "job record missing, nothing to mark failed");
                Ok(())
            }
            Err(e) => Err(store_error(e)),
        }
    }

    fn compensation_options(&self) -> StepOptions {
        self.settings.persistence_options()
    }
}
