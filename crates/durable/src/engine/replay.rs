//! Checkpoint log replay

use std::collections::HashMap;

use crate::workflow::{WorkflowError, WorkflowEvent};

/// Where compensation stands for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompensationState {
    NotStarted,
    /// Started in an earlier run but never finished; it runs again
    Interrupted,
    Finished,
}

/// State rebuilt from an instance's event log
#[derive(Debug)]
pub(crate) struct ReplayState {
    pub completed: HashMap<String, serde_json::Value>,
    attempts: HashMap<String, u32>,
    /// Terminal step failure already on record
    pub failure: Option<WorkflowError>,
    pub compensation: CompensationState,
    /// WorkflowCompleted / WorkflowFailed already appended
    pub finished: Option<WorkflowEvent>,
}

impl ReplayState {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a WorkflowEvent>) -> Self {
        let mut state = Self {
            completed: HashMap::new(),
            attempts: HashMap::new(),
            failure: None,
            compensation: CompensationState::NotStarted,
            finished: None,
        };

        for event in events {
            match event {
                WorkflowEvent::StepStarted { step_id, attempt } => {
                    let seen = state.attempts.entry(step_id.clone()).or_insert(0);
                    *seen = (*seen).max(*attempt);
                }
                WorkflowEvent::StepCompleted { step_id, output } => {
                    state.completed.insert(step_id.clone(), output.clone());
                }
                WorkflowEvent::StepFailed {
                    step_id,
                    error,
                    will_retry: false,
                    ..
                } => {
                    state.failure = Some(WorkflowError::from_step(step_id, error));
                }
                WorkflowEvent::CompensationStarted { error } => {
                    state.failure.get_or_insert_with(|| error.clone());
                    state.compensation = CompensationState::Interrupted;
                }
                WorkflowEvent::CompensationCompleted | WorkflowEvent::CompensationFailed { .. } => {
                    state.compensation = CompensationState::Finished;
                }
                WorkflowEvent::WorkflowCompleted { .. } | WorkflowEvent::WorkflowFailed { .. } => {
                    state.finished = Some(event.clone());
                }
                WorkflowEvent::WorkflowStarted { .. } | WorkflowEvent::StepFailed { .. } => {}
            }
        }

        state
    }

    /// Attempts recorded for `step_id`, across all runs
    pub fn attempts(&self, step_id: &str) -> u32 {
        self.attempts.get(step_id).copied().unwrap_or(0)
    }

    pub fn record_attempt(&mut self, step_id: &str, attempt: u32) {
        self.attempts.insert(step_id.to_string(), attempt);
    }
}
