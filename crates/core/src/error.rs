// Error taxonomy
//
// Each collaborator has its own error enum. Every enum can say whether a
// failure is transient (`is_retryable`) and give a stable code, which the
// workflow turns into a retryable or terminal step error.

use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Connection and query failures are transient; the rest are facts
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Database(_) => "DATABASE",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    /// Balance is zero; nothing was debited
    #[error("insufficient credit for user {user_id}")]
    InsufficientCredit { user_id: String },

    #[error("no credit account for user {0}")]
    AccountNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientCredit { .. } => "INSUFFICIENT_CREDIT",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::Store(e) => e.code(),
        }
    }
}

/// Typed failure from a restoration provider
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider timed out: {0}")]
    Timeout(String),

    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The provider rejected the request; retrying cannot help
    #[error("provider rejected input: {0}")]
    InvalidInput(String),

    #[error("provider unavailable: {0}")]
    TransientUnavailable(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidInput(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "TIMEOUT",
            Self::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::TransientUnavailable(_) => "TRANSIENT_UNAVAILABLE",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object store I/O error: {0}")]
    Io(String),
}

impl ObjectStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "OBJECT_NOT_FOUND",
            Self::InvalidKey(_) => "INVALID_OBJECT_KEY",
            Self::Io(_) => "OBJECT_STORE_IO",
        }
    }
}

/// Why a submission was not started
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown preset: {0}")]
    InvalidPreset(String),

    #[error("insufficient credit for user {user_id}")]
    InsufficientCredit { user_id: String },

    #[error("image {image_id} already has a live job (workflow {existing_workflow})")]
    DuplicateJob {
        image_id: String,
        existing_workflow: Uuid,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error("engine error: {0}")]
    Engine(String),
}

impl From<LedgerError> for DispatchError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredit { user_id } | LedgerError::AccountNotFound(user_id) => {
                Self::InsufficientCredit { user_id }
            }
            other => Self::Ledger(other),
        }
    }
}
