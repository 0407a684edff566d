//! Step execution context

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::StepError;

/// Context handed to a step attempt
///
/// Carries the attempt counters and read access to the checkpointed outputs
/// of steps that already completed in this instance, including those
/// recovered from a previous process.
#[derive(Debug)]
pub struct StepContext<'a> {
    pub workflow_id: Uuid,

    pub step_id: &'a str,

    /// Current attempt number (1-based)
    pub attempt: u32,

    pub max_attempts: u32,

    completed: &'a HashMap<String, serde_json::Value>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        workflow_id: Uuid,
        step_id: &'a str,
        attempt: u32,
        max_attempts: u32,
        completed: &'a HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            workflow_id,
            step_id,
            attempt,
            max_attempts,
            completed,
        }
    }

    /// Typed output of an earlier step.
    ///
    /// A missing checkpoint means the workflow's step order is broken, which
    /// no retry can fix, so it is reported as a terminal error.
    pub fn output<T: DeserializeOwned>(&self, step_id: &str) -> Result<T, StepError> {
        let value = self.completed.get(step_id).ok_or_else(|| {
            StepError::terminal(format!("no checkpointed output for step '{step_id}'"))
                .with_type("MISSING_CHECKPOINT")
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn has_output(&self, step_id: &str) -> bool {
        self.completed.contains_key(step_id)
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
