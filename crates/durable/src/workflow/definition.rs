//! Workflow trait definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::StepOptions;
use crate::step::{StepContext, StepError};

/// Why a workflow instance failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowError {
    pub message: String,

    /// Error code of the step error that ended the run, if it had one
    pub code: Option<String>,

    /// Step that failed terminally
    pub step_id: Option<String>,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            step_id: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Failure caused by `error` in `step_id`
    pub fn from_step(step_id: &str, error: &StepError) -> Self {
        Self {
            message: error.message.clone(),
            code: error.error_type.clone(),
            step_id: Some(step_id.to_string()),
        }
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step_id {
            Some(step_id) => write!(f, "step '{}' failed: {}", step_id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for WorkflowError {}

/// A workflow is an ordered sequence of named, checkpointed steps
///
/// The executor runs `steps()` in order. Each completed step's output is
/// persisted, so a resumed instance skips straight to the first step without
/// a checkpoint. Every step must therefore be idempotent: it may run again
/// after a crash that happened between its side effect and its checkpoint.
///
/// When a step fails terminally (a terminal error, or a retryable one that
/// exhausted its ceiling), [`Workflow::compensate`] runs once with the
/// failure before the instance is marked failed.
///
/// # Example
///
/// ```ignore
/// use timeglow_durable::prelude::*;
///
/// struct Shipping { orders: Arc<dyn OrderStore> }
///
/// #[async_trait]
/// impl Workflow for Shipping {
///     const TYPE: &'static str = "shipping";
///     type Input = ShipOrder;
///
///     fn steps(&self) -> &'static [&'static str] {
///         &["reserve", "ship"]
///     }
///
///     async fn execute_step(
///         &self,
///         ctx: &StepContext<'_>,
///         input: &Self::Input,
///     ) -> Result<serde_json::Value, StepError> {
///         match ctx.step_id {
///             "reserve" => self.reserve(input).await,
///             "ship" => self.ship(ctx.output("reserve")?).await,
///             other => Err(StepError::terminal(format!("unknown step {other}"))),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Unique type identifier, stored with every instance
    const TYPE: &'static str;

    type Input: Serialize + DeserializeOwned + Send + Sync + Clone;

    /// Step identifiers in execution order
    fn steps(&self) -> &'static [&'static str];

    fn step_options(&self, step_id: &str) -> StepOptions {
        let _ = step_id;
        StepOptions::default()
    }

    /// Run one attempt of `ctx.step_id`
    async fn execute_step(
        &self,
        ctx: &StepContext<'_>,
        input: &Self::Input,
    ) -> Result<serde_json::Value, StepError>;

    /// Compensation for a terminal failure. Runs under
    /// [`Workflow::compensation_options`] and must be idempotent.
    async fn compensate(
        &self,
        ctx: &StepContext<'_>,
        input: &Self::Input,
        error: &WorkflowError,
    ) -> Result<(), StepError> {
        let _ = (ctx, input, error);
        Ok(())
    }

    fn compensation_options(&self) -> StepOptions {
        StepOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_step_keeps_code_and_step() {
        let step_error = StepError::terminal("image rejected").with_type("INVALID_INPUT");
        let error = WorkflowError::from_step("invoke", &step_error);

        assert_eq!(error.code.as_deref(), Some("INVALID_INPUT"));
        assert_eq!(error.step_id.as_deref(), Some("invoke"));
        assert_eq!(error.to_string(), "step 'invoke' failed: image rejected");
    }

    #[test]
    fn test_display_without_step() {
        let error = WorkflowError::new("abandoned").with_code("ABANDONED");
        assert_eq!(error.to_string(), "abandoned");
    }
}
