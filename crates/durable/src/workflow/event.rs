//! Workflow events for persistence

use serde::{Deserialize, Serialize};

use super::WorkflowError;
use crate::step::StepError;

/// Events stored in the durable_workflow_events table
///
/// The append-only checkpoint log of one instance. Replaying it yields the
/// completed step outputs, the attempt count of every step and whether a
/// terminal failure or compensation is already on record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    // =========================================================================
    // Workflow Lifecycle Events
    // =========================================================================
    WorkflowStarted {
        input: serde_json::Value,
    },

    WorkflowCompleted {
        /// Outputs of all steps, keyed by step id
        result: serde_json::Value,
    },

    WorkflowFailed {
        error: WorkflowError,
    },

    // =========================================================================
    // Step Events
    // =========================================================================
    /// An attempt began. Written before the step runs, so attempts survive
    /// restarts and the ceiling holds across processes.
    StepStarted {
        step_id: String,
        attempt: u32,
    },

    /// Checkpoint: the step's output, never re-executed afterwards
    StepCompleted {
        step_id: String,
        output: serde_json::Value,
    },

    StepFailed {
        step_id: String,
        attempt: u32,
        error: StepError,
        will_retry: bool,
    },

    // =========================================================================
    // Compensation Events
    // =========================================================================
    CompensationStarted {
        error: WorkflowError,
    },

    CompensationCompleted,

    CompensationFailed {
        error: StepError,
    },
}

impl WorkflowEvent {
    /// Step id for step-scoped events
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step_id, .. }
            | Self::StepCompleted { step_id, .. }
            | Self::StepFailed { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. }
        )
    }

    /// Tag used for the event_type column
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::CompensationStarted { .. } => "compensation_started",
            Self::CompensationCompleted => "compensation_completed",
            Self::CompensationFailed { .. } => "compensation_failed",
        }
    }
}
