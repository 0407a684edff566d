// Event intake HTTP routes
//
// POST /events   image.uploaded | billing.topup | account.opened
// GET  /jobs/:id job status and result reference
// GET  /health

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use timeglow_core::{
    CreditAccount, DispatchError, JobStatus, JobStore, LedgerError, PipelineEvent,
    RestorationStore,
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::billing::BillingHandler;
use crate::dispatcher::Dispatcher;

/// Error body for every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine-readable code
    pub code: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

/// Body of a 202 for an accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: Uuid,
    pub workflow_id: Uuid,
    pub reroll_number: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub user_id: String,
    pub credits_remaining: i32,
    pub reset_at: DateTime<Utc>,
    pub total_processed: i32,
}

impl From<CreditAccount> for AccountView {
    fn from(account: CreditAccount) -> Self {
        Self {
            user_id: account.user_id,
            credits_remaining: account.credits_remaining,
            reset_at: account.reset_at,
            total_processed: account.total_processed,
        }
    }
}

/// Dashboard view of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: Uuid,
    pub image_id: String,
    pub user_id: String,
    pub preset_id: String,
    pub status: JobStatus,
    pub reroll_number: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// App state for intake routes
#[derive(Clone)]
pub struct IntakeState {
    pub dispatcher: Arc<Dispatcher>,
    pub billing: Arc<BillingHandler>,
    pub jobs: Arc<dyn JobStore>,
    pub results: Arc<dyn RestorationStore>,
}

pub fn routes(state: IntakeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(receive_event))
        .route("/jobs/:job_id", get(get_job))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /events - Accept one pipeline event
pub async fn receive_event(
    State(state): State<IntakeState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let event: PipelineEvent = match serde_json::from_value(body) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "rejected event");
            return ErrorResponse::new("INVALID_EVENT", e.to_string())
                .into_response(StatusCode::BAD_REQUEST)
                .into_response();
        }
    };

    match event {
        PipelineEvent::ImageUploaded(upload) => match state.dispatcher.dispatch(upload).await {
            Ok(job) => (
                StatusCode::ACCEPTED,
                Json(JobAccepted {
                    job_id: job.job_id,
                    workflow_id: job.workflow_id,
                    reroll_number: job.reroll_number,
                }),
            )
                .into_response(),
            Err(e) => dispatch_error(e).into_response(),
        },
        PipelineEvent::BillingTopup(topup) => account_response(state.billing.topup(&topup).await),
        PipelineEvent::AccountOpened(opened) => {
            account_response(state.billing.open_account(&opened).await)
        }
    }
}

/// GET /jobs/:job_id - Job status with its result reference once completed
pub async fn get_job(
    State(state): State<IntakeState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>, StatusCode> {
    let job = state
        .jobs
        .get_job(job_id)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to get job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let result = state.results.get_result_for_job(job_id).await.map_err(|e| {
        error!(error = %e, "Failed to get restoration result");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(JobView {
        id: job.id,
        image_id: job.image_id,
        user_id: job.user_id,
        preset_id: job.preset_id,
        status: job.status,
        reroll_number: job.reroll_number,
        created_at: job.created_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
        error_message: job.error_message,
        result_ref: result.map(|r| r.result_ref),
    }))
}

fn dispatch_error(err: DispatchError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        DispatchError::InvalidPreset(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_PRESET"),
        DispatchError::InsufficientCredit { .. } => {
            (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDIT")
        }
        DispatchError::DuplicateJob { .. } => (StatusCode::CONFLICT, "DUPLICATE_JOB"),
        DispatchError::Store(_) | DispatchError::Ledger(_) | DispatchError::Engine(_) => {
            error!(error = %err, "Failed to dispatch job");
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
        }
    };
    ErrorResponse::new(code, err.to_string()).into_response(status)
}

fn account_response(result: Result<CreditAccount, LedgerError>) -> Response {
    match result {
        Ok(account) => (StatusCode::OK, Json(AccountView::from(account))).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to apply billing event");
            ErrorResponse::new(e.code(), e.to_string())
                .into_response(StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}
