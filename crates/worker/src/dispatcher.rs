// Job Dispatcher
//
// Entry point for "image uploaded" submissions. Validates the preset and the
// balance up front, then starts exactly one workflow instance per image: the
// instance's dedup key is the image id, so a second submission while the
// first is live is rejected instead of racing it.

use std::sync::Arc;

use timeglow_core::{DispatchError, ImageUploaded, NewJob, PresetCatalog};
use timeglow_durable::{ExecutorError, RunHandle, StoreError as CheckpointError, WorkflowError};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::workflow::{Collaborators, PipelineRunner, RestorationInput};

/// An accepted submission
#[derive(Debug)]
pub struct DispatchedJob {
    pub job_id: Uuid,
    pub workflow_id: Uuid,
    pub reroll_number: i32,
    /// Background run of the instance; `None` if the runner refused it, in
    /// which case the next `resume_incomplete` picks it up
    pub handle: Option<RunHandle>,
}

pub struct Dispatcher {
    catalog: PresetCatalog,
    collaborators: Collaborators,
    runner: Arc<PipelineRunner>,
}

impl Dispatcher {
    pub fn new(collaborators: Collaborators, runner: Arc<PipelineRunner>) -> Self {
        Self {
            catalog: PresetCatalog::new(),
            collaborators,
            runner,
        }
    }

    #[instrument(skip(self, event), fields(image_id = %event.image_id, user_id = %event.user_id))]
    pub async fn dispatch(&self, event: ImageUploaded) -> Result<DispatchedJob, DispatchError> {
        if !self.catalog.contains(&event.preset) {
            return Err(DispatchError::InvalidPreset(event.preset));
        }

        let account = self.collaborators.ledger.balance(&event.user_id).await?;
        if !account.is_some_and(|a| a.can_spend()) {
            return Err(DispatchError::InsufficientCredit {
                user_id: event.user_id,
            });
        }

        let reroll_number = self
            .collaborators
            .results
            .count_results_for_image(&event.image_id)
            .await?;
        let reroll_number = i32::try_from(reroll_number).unwrap_or(i32::MAX);

        let input = RestorationInput {
            job_id: Uuid::now_v7(),
            image_id: event.image_id.clone(),
            user_id: event.user_id.clone(),
            preset_id: event.preset.clone(),
        };

        let executor = self.runner.executor();
        let workflow_id = match executor
            .start_workflow::<crate::RestorationWorkflow>(Some(&event.image_id), &input)
            .await
        {
            Ok(id) => id,
            Err(ExecutorError::Store(CheckpointError::DuplicateKey { existing, .. })) => {
                return Err(DispatchError::DuplicateJob {
                    image_id: event.image_id,
                    existing_workflow: existing,
                });
            }
            Err(e) => return Err(DispatchError::Engine(e.to_string())),
        };

        let created = self
            .collaborators
            .jobs
            .create_job(NewJob {
                id: input.job_id,
                image_id: input.image_id.clone(),
                user_id: input.user_id.clone(),
                preset_id: input.preset_id.clone(),
                reroll_number,
            })
            .await;

        if let Err(e) = created {
            // Release the dedup key so the image can be resubmitted
            let abandon = WorkflowError::new(format!("job record not created: {e}"))
                .with_code("JOB_CREATE_FAILED");
            if let Err(abandon_err) = executor.abandon_workflow(workflow_id, abandon).await {
                warn!(%workflow_id, error = %abandon_err, "failed to abandon workflow");
            }
            return Err(e.into());
        }

        let handle = match self.runner.spawn(workflow_id) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(%workflow_id, error = %e, "workflow not spawned, left for resume");
                None
            }
        };

        info!(
            job_id = %input.job_id,
            %workflow_id,
            preset = %input.preset_id,
            reroll_number,
            "job dispatched"
        );

        Ok(DispatchedJob {
            job_id: input.job_id,
            workflow_id,
            reroll_number,
            handle,
        })
    }
}
