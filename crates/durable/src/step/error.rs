//! Step outcome errors

use serde::{Deserialize, Serialize};

/// Classification of a failed step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// Transient; the engine may run the step again
    Retryable,
    /// Permanent; the workflow fails and compensation runs
    Terminal,
}

/// Error returned by a step attempt
///
/// A step's result is `Result<Value, StepError>`, which gives exactly three
/// outcomes: success, a retryable failure and a terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepError {
    pub message: String,

    /// Stable error code for programmatic handling (e.g. `QUOTA_EXCEEDED`)
    pub error_type: Option<String>,

    pub retryable: bool,

    /// Extra context recorded with the checkpoint
    pub details: Option<serde_json::Value>,
}

impl StepError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn kind(&self) -> StepErrorKind {
        if self.retryable {
            StepErrorKind::Retryable
        } else {
            StepErrorKind::Terminal
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{}: {}", error_type, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for StepError {}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::terminal(err.to_string()).with_type("SERIALIZATION")
    }
}
