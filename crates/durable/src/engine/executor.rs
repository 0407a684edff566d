//! Workflow executor with checkpoint replay
//!
//! The `WorkflowExecutor` is responsible for:
//! - Creating instances (claiming their dedup key)
//! - Replaying an instance's checkpoint log
//! - Running the remaining steps with retries and timeouts
//! - Running compensation after a terminal step failure

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::persistence::{CheckpointStore, StoreError, WorkflowStatus};
use crate::reliability::{run_with_timeout, RetryDecision, RetryPolicy};
use crate::step::{StepContext, StepError};
use crate::workflow::{Workflow, WorkflowError, WorkflowEvent};

use super::replay::{CompensationState, ReplayState};

/// Step id reported to the compensation's context
pub const COMPENSATION_STEP: &str = "compensate";

/// Configuration for the workflow executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum events per workflow (for safety)
    pub max_events_per_workflow: usize,

    /// Retries for checkpoint store calls that fail transiently
    pub store_retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_events_per_workflow: 10000,
            store_retry: RetryPolicy::with_retries(4)
                .with_initial_interval(Duration::from_millis(100))
                .with_max_interval(Duration::from_secs(2)),
        }
    }
}

impl ExecutorConfig {
    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }
}

/// Errors from executor operations
///
/// These are engine failures (the checkpoint store is unreachable, the log
/// is corrupt). Step failures never surface here; they end the instance.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Instance belongs to a different workflow type
    #[error("workflow {id} has type '{actual}', expected '{expected}'")]
    TypeMismatch {
        id: Uuid,
        expected: &'static str,
        actual: String,
    },

    #[error("replay error: {0}")]
    ReplayError(String),

    #[error("workflow {0} has too many events ({1} > {2})")]
    TooManyEvents(Uuid, usize, usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExecutorError {
    /// The store was unreachable; running the instance again may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

/// Final state of one `run_workflow` call
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    /// Step outputs keyed by step id (completed instances only)
    pub result: Option<serde_json::Value>,
    pub error: Option<WorkflowError>,
    /// Steps executed by this call
    pub steps_executed: usize,
    /// Steps skipped because a checkpoint already existed
    pub steps_replayed: usize,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

/// Workflow executor
///
/// Runs one instance at a time per call. Two concurrent `run_workflow` calls
/// for the same instance are rejected by the store's sequence check, so at
/// most one of them makes progress.
///
/// # Example
///
/// ```ignore
/// use timeglow_durable::prelude::*;
///
/// let executor = WorkflowExecutor::new(Arc::new(InMemoryCheckpointStore::new()));
///
/// let workflow_id = executor
///     .start_workflow::<MyWorkflow>(Some("order-42"), &input)
///     .await?;
/// let outcome = executor.run_workflow(&my_workflow, workflow_id).await?;
/// ```
pub struct WorkflowExecutor<S: CheckpointStore + ?Sized> {
    store: Arc<S>,
    config: ExecutorConfig,
}

impl<S: CheckpointStore + ?Sized> WorkflowExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, ExecutorConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: ExecutorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a pending instance and record its start.
    ///
    /// Fails with [`StoreError::DuplicateKey`] (wrapped) when a live instance
    /// already holds `dedup_key`.
    #[instrument(skip(self, input), fields(workflow_type = W::TYPE))]
    pub async fn start_workflow<W: Workflow>(
        &self,
        dedup_key: Option<&str>,
        input: &W::Input,
    ) -> Result<Uuid, ExecutorError> {
        let workflow_id = Uuid::now_v7();
        let input_json = serde_json::to_value(input)?;

        self.store
            .create_workflow(workflow_id, W::TYPE, dedup_key, input_json.clone())
            .await?;

        let mut sequence = 0;
        self.append(
            workflow_id,
            &mut sequence,
            WorkflowEvent::WorkflowStarted { input: input_json },
        )
        .await?;

        info!(%workflow_id, "started workflow");
        Ok(workflow_id)
    }

    /// Fail an instance that never ran, releasing its dedup key.
    #[instrument(skip(self, error))]
    pub async fn abandon_workflow(
        &self,
        workflow_id: Uuid,
        error: WorkflowError,
    ) -> Result<(), ExecutorError> {
        let mut sequence = self.load_events(workflow_id).await?.len() as i32;
        self.append(
            workflow_id,
            &mut sequence,
            WorkflowEvent::WorkflowFailed {
                error: error.clone(),
            },
        )
        .await?;
        self.set_status(workflow_id, WorkflowStatus::Failed, None, Some(error)).await?;

        warn!(%workflow_id, "abandoned workflow");
        Ok(())
    }

    /// Drive an instance to a terminal state.
    ///
    /// Replays the checkpoint log first: completed steps are skipped, attempt
    /// counts carry over, and a terminal failure or interrupted compensation
    /// already on record is picked up where it stopped. Calling this on a
    /// terminal instance is a no-op that reports its stored outcome.
    #[instrument(skip(self, workflow), fields(workflow_type = W::TYPE))]
    pub async fn run_workflow<W: Workflow>(
        &self,
        workflow: &W,
        workflow_id: Uuid,
    ) -> Result<RunOutcome, ExecutorError> {
        let store = &*self.store;
        let info = self
            .retry_store(workflow_id, "get_workflow_info", move || {
                store.get_workflow_info(workflow_id)
            })
            .await?;

        if info.workflow_type != W::TYPE {
            return Err(ExecutorError::TypeMismatch {
                id: workflow_id,
                expected: W::TYPE,
                actual: info.workflow_type,
            });
        }

        if info.status.is_terminal() {
            debug!(%workflow_id, status = %info.status, "workflow already in terminal state");
            return Ok(RunOutcome {
                workflow_id,
                status: info.status,
                result: info.result,
                error: info.error,
                steps_executed: 0,
                steps_replayed: 0,
            });
        }

        let mut events = self.load_events(workflow_id).await?;

        if events.len() > self.config.max_events_per_workflow {
            return Err(ExecutorError::TooManyEvents(
                workflow_id,
                events.len(),
                self.config.max_events_per_workflow,
            ));
        }

        // Created but the start event never landed
        if events.is_empty() {
            let started = WorkflowEvent::WorkflowStarted {
                input: info.input.clone(),
            };
            let mut sequence = 0;
            self.append(workflow_id, &mut sequence, started.clone()).await?;
            events.push((0, started));
        }

        if !matches!(&events[0].1, WorkflowEvent::WorkflowStarted { .. }) {
            return Err(ExecutorError::ReplayError(
                "first event must be WorkflowStarted".to_string(),
            ));
        }

        let input: W::Input = serde_json::from_value(info.input.clone())?;
        let mut replay = ReplayState::from_events(events.iter().map(|(_, e)| e));
        let mut sequence = events.len() as i32;

        // Terminal event written but the status update was lost
        if let Some(finished) = replay.finished.take() {
            return self.finalize_from_event(workflow_id, finished).await;
        }

        if info.status == WorkflowStatus::Pending {
            self.set_status(workflow_id, WorkflowStatus::Running, None, None).await?;
        }

        let steps_replayed = workflow
            .steps()
            .iter()
            .filter(|s| replay.completed.contains_key(**s))
            .count();
        if steps_replayed > 0 {
            info!(%workflow_id, steps_replayed, "resuming from checkpoints");
        }

        let mut steps_executed = 0;
        let mut failure = replay.failure.take();

        if failure.is_none() {
            for step_id in workflow.steps() {
                if replay.completed.contains_key(*step_id) {
                    continue;
                }

                steps_executed += 1;
                match self
                    .run_step(workflow, workflow_id, &input, step_id, &mut replay, &mut sequence)
                    .await?
                {
                    Ok(output) => {
                        replay.completed.insert(step_id.to_string(), output);
                    }
                    Err(step_error) => {
                        failure = Some(WorkflowError::from_step(step_id, &step_error));
                        break;
                    }
                }
            }
        }

        if let Some(error) = failure {
            if replay.compensation != CompensationState::Finished {
                self.run_compensation(workflow, workflow_id, &input, &error, &replay, &mut sequence)
                    .await?;
            }

            self.append(
                workflow_id,
                &mut sequence,
                WorkflowEvent::WorkflowFailed {
                    error: error.clone(),
                },
            )
            .await?;
            self.set_status(workflow_id, WorkflowStatus::Failed, None, Some(error.clone()))
                .await?;

            warn!(%workflow_id, error = %error, "workflow failed");
            return Ok(RunOutcome {
                workflow_id,
                status: WorkflowStatus::Failed,
                result: None,
                error: Some(error),
                steps_executed,
                steps_replayed,
            });
        }

        let result = collect_outputs(workflow.steps(), &replay);
        self.append(
            workflow_id,
            &mut sequence,
            WorkflowEvent::WorkflowCompleted {
                result: result.clone(),
            },
        )
        .await?;
        self.set_status(
            workflow_id,
            WorkflowStatus::Completed,
            Some(result.clone()),
            None,
        )
        .await?;

        info!(%workflow_id, steps_executed, steps_replayed, "workflow completed");
        Ok(RunOutcome {
            workflow_id,
            status: WorkflowStatus::Completed,
            result: Some(result),
            error: None,
            steps_executed,
            steps_replayed,
        })
    }

    /// Run attempts of one step until it succeeds or fails terminally.
    ///
    /// The outer result carries store failures; the inner one is the step's
    /// own outcome.
    async fn run_step<W: Workflow>(
        &self,
        workflow: &W,
        workflow_id: Uuid,
        input: &W::Input,
        step_id: &str,
        replay: &mut ReplayState,
        sequence: &mut i32,
    ) -> Result<Result<serde_json::Value, StepError>, ExecutorError> {
        let options = workflow.step_options(step_id);
        let policy = &options.retry_policy;

        loop {
            let prior_attempts = replay.attempts(step_id);

            // Every attempt was spent by runs that crashed before recording a result
            if prior_attempts >= policy.max_attempts {
                let error = StepError::terminal(format!(
                    "attempt ceiling of {} reached before a result was recorded",
                    policy.max_attempts
                ))
                .with_type("ATTEMPTS_EXHAUSTED");
                self.record_failure(workflow_id, sequence, step_id, prior_attempts, &error, false)
                    .await?;
                return Ok(Err(error));
            }

            let attempt = prior_attempts + 1;
            self.append(
                workflow_id,
                sequence,
                WorkflowEvent::StepStarted {
                    step_id: step_id.to_string(),
                    attempt,
                },
            )
            .await?;
            replay.record_attempt(step_id, attempt);

            debug!(%workflow_id, step_id, attempt, "running step");
            let result = {
                let ctx = StepContext::new(
                    workflow_id,
                    step_id,
                    attempt,
                    policy.max_attempts,
                    &replay.completed,
                );
                run_with_timeout(options.attempt_timeout, workflow.execute_step(&ctx, input)).await
            };

            let error = match result {
                Ok(output) => {
                    self.append(
                        workflow_id,
                        sequence,
                        WorkflowEvent::StepCompleted {
                            step_id: step_id.to_string(),
                            output: output.clone(),
                        },
                    )
                    .await?;
                    debug!(%workflow_id, step_id, attempt, "step completed");
                    return Ok(Ok(output));
                }
                Err(error) => error,
            };

            match policy.decide(attempt, &error) {
                RetryDecision::Retry { delay } => {
                    self.record_failure(workflow_id, sequence, step_id, attempt, &error, true)
                        .await?;
                    warn!(
                        %workflow_id,
                        step_id,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    self.record_failure(workflow_id, sequence, step_id, attempt, &error, false)
                        .await?;
                    warn!(%workflow_id, step_id, attempt, error = %error, "step failed terminally");
                    return Ok(Err(error));
                }
            }
        }
    }

    async fn record_failure(
        &self,
        workflow_id: Uuid,
        sequence: &mut i32,
        step_id: &str,
        attempt: u32,
        error: &StepError,
        will_retry: bool,
    ) -> Result<(), ExecutorError> {
        self.append(
            workflow_id,
            sequence,
            WorkflowEvent::StepFailed {
                step_id: step_id.to_string(),
                attempt,
                error: error.clone(),
                will_retry,
            },
        )
        .await
    }

    /// Run the workflow's compensation under its own retry policy.
    ///
    /// A compensation that still fails is logged and recorded; the instance
    /// is marked failed either way.
    async fn run_compensation<W: Workflow>(
        &self,
        workflow: &W,
        workflow_id: Uuid,
        input: &W::Input,
        error: &WorkflowError,
        replay: &ReplayState,
        sequence: &mut i32,
    ) -> Result<(), ExecutorError> {
        if replay.compensation == CompensationState::NotStarted {
            self.append(
                workflow_id,
                sequence,
                WorkflowEvent::CompensationStarted {
                    error: error.clone(),
                },
            )
            .await?;
        }

        let options = workflow.compensation_options();
        let policy = &options.retry_policy;
        let mut attempt = 1;

        loop {
            let result = {
                let ctx = StepContext::new(
                    workflow_id,
                    COMPENSATION_STEP,
                    attempt,
                    policy.max_attempts,
                    &replay.completed,
                );
                run_with_timeout(
                    options.attempt_timeout,
                    workflow.compensate(&ctx, input, error),
                )
                .await
            };

            match result {
                Ok(()) => {
                    self.append(workflow_id, sequence, WorkflowEvent::CompensationCompleted)
                        .await?;
                    info!(%workflow_id, "compensation completed");
                    return Ok(());
                }
                Err(comp_error) => match policy.decide(attempt, &comp_error) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            %workflow_id,
                            attempt,
                            error = %comp_error,
                            "compensation failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => {
                        error!(%workflow_id, attempt, error = %comp_error, "compensation failed");
                        self.append(
                            workflow_id,
                            sequence,
                            WorkflowEvent::CompensationFailed { error: comp_error },
                        )
                        .await?;
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn finalize_from_event(
        &self,
        workflow_id: Uuid,
        finished: WorkflowEvent,
    ) -> Result<RunOutcome, ExecutorError> {
        let (status, result, error) = match finished {
            WorkflowEvent::WorkflowCompleted { result } => {
                (WorkflowStatus::Completed, Some(result), None)
            }
            WorkflowEvent::WorkflowFailed { error } => (WorkflowStatus::Failed, None, Some(error)),
            other => {
                return Err(ExecutorError::ReplayError(format!(
                    "unexpected terminal event: {}",
                    other.event_type()
                )))
            }
        };

        self.set_status(workflow_id, status, result.clone(), error.clone()).await?;

        info!(%workflow_id, %status, "restored terminal status from checkpoint log");
        Ok(RunOutcome {
            workflow_id,
            status,
            result,
            error,
            steps_executed: 0,
            steps_replayed: 0,
        })
    }

    /// Append one event at `sequence`, advancing it.
    ///
    /// A transient failure may hide a write that landed, so before writing
    /// again the log is reloaded and a matching event at `sequence` counts as
    /// the append.
    async fn append(
        &self,
        workflow_id: Uuid,
        sequence: &mut i32,
        event: WorkflowEvent,
    ) -> Result<(), ExecutorError> {
        let policy = &self.config.store_retry;
        let mut attempt = 1;

        loop {
            let error = match self
                .store
                .append_events(workflow_id, *sequence, vec![event.clone()])
                .await
            {
                Ok(next) => {
                    *sequence = next;
                    return Ok(());
                }
                Err(e) if e.is_transient() && policy.has_attempts_remaining(attempt) => e,
                Err(e) => return Err(e.into()),
            };

            attempt += 1;
            let delay = policy.delay_for_attempt(attempt);
            warn!(
                %workflow_id,
                sequence = *sequence,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "checkpoint append failed, retrying"
            );
            tokio::time::sleep(delay).await;

            if let Ok(events) = self.store.load_events(workflow_id).await {
                let landed = events
                    .get(*sequence as usize)
                    .is_some_and(|(_, stored)| *stored == event);
                if landed && events.len() as i32 == *sequence + 1 {
                    debug!(%workflow_id, sequence = *sequence, "append had been applied");
                    *sequence += 1;
                    return Ok(());
                }
            }
        }
    }

    async fn load_events(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
        let store = &*self.store;
        self.retry_store(workflow_id, "load_events", move || store.load_events(workflow_id))
            .await
    }

    async fn set_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError> {
        let store = &*self.store;
        self.retry_store(workflow_id, "update_workflow_status", move || {
            store.update_workflow_status(workflow_id, status, result.clone(), error.clone())
        })
        .await
    }

    /// Repeat an idempotent store call while it fails transiently and the
    /// store retry policy has attempts left.
    async fn retry_store<T, F, Fut>(
        &self,
        workflow_id: Uuid,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let policy = &self.config.store_retry;
        let mut attempt = 1;

        loop {
            match call().await {
                Err(e) if e.is_transient() && policy.has_attempts_remaining(attempt) => {
                    attempt += 1;
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        %workflow_id,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "checkpoint store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

fn collect_outputs(steps: &[&str], replay: &ReplayState) -> serde_json::Value {
    let outputs: serde_json::Map<String, serde_json::Value> = steps
        .iter()
        .filter_map(|s| {
            replay
                .completed
                .get(*s)
                .map(|output| (s.to_string(), output.clone()))
        })
        .collect();
    serde_json::Value::Object(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::flaky::{FlakyCheckpointStore, LostAppend};
    use crate::persistence::InMemoryCheckpointStore;
    use crate::workflow::StepOptions;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CounterInput {
        start: i64,
    }

    /// Three steps that add to a running total. Outcomes can be scripted per
    /// step; unscripted attempts succeed.
    #[derive(Default)]
    struct CounterWorkflow {
        script: Mutex<HashMap<&'static str, VecDeque<Result<(), StepError>>>>,
        calls: Mutex<Vec<String>>,
        compensations: Mutex<Vec<WorkflowError>>,
        fail_compensation: bool,
    }

    impl CounterWorkflow {
        fn script(&self, step: &'static str, outcomes: Vec<Result<(), StepError>>) {
            self.script.lock().insert(step, outcomes.into());
        }

        fn calls(&self, step: &str) -> usize {
            self.calls.lock().iter().filter(|s| *s == step).count()
        }
    }

    #[async_trait]
    impl Workflow for CounterWorkflow {
        const TYPE: &'static str = "counter_workflow";
        type Input = CounterInput;

        fn steps(&self) -> &'static [&'static str] {
            &["add_one", "add_two", "add_three"]
        }

        fn step_options(&self, _step_id: &str) -> StepOptions {
            StepOptions::new(
                RetryPolicy::with_retries(2)
                    .with_initial_interval(Duration::from_millis(10))
                    .with_jitter(0.0),
            )
        }

        async fn execute_step(
            &self,
            ctx: &StepContext<'_>,
            input: &Self::Input,
        ) -> Result<serde_json::Value, StepError> {
            self.calls.lock().push(ctx.step_id.to_string());

            let scripted = self
                .script
                .lock()
                .get_mut(ctx.step_id)
                .and_then(|outcomes| outcomes.pop_front());
            if let Some(Err(error)) = scripted {
                return Err(error);
            }

            let previous = match ctx.step_id {
                "add_one" => input.start,
                "add_two" => ctx.output::<i64>("add_one")?,
                _ => ctx.output::<i64>("add_two")?,
            };
            let increment = match ctx.step_id {
                "add_one" => 1,
                "add_two" => 2,
                _ => 3,
            };
            Ok(json!(previous + increment))
        }

        async fn compensate(
            &self,
            _ctx: &StepContext<'_>,
            _input: &Self::Input,
            error: &WorkflowError,
        ) -> Result<(), StepError> {
            self.compensations.lock().push(error.clone());
            if self.fail_compensation {
                return Err(StepError::terminal("compensation broke"));
            }
            Ok(())
        }

        fn compensation_options(&self) -> StepOptions {
            StepOptions::once()
        }
    }

    fn executor() -> (Arc<InMemoryCheckpointStore>, WorkflowExecutor<InMemoryCheckpointStore>) {
        let store = Arc::new(InMemoryCheckpointStore::new());
        (store.clone(), WorkflowExecutor::new(store))
    }

    #[tokio::test]
    async fn test_runs_all_steps_in_order() {
        let (store, executor) = executor();
        let workflow = CounterWorkflow::default();

        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 10 })
            .await
            .expect("should start");
        let outcome = executor
            .run_workflow(&workflow, id)
            .await
            .expect("should run");

        assert!(outcome.is_completed());
        assert_eq!(outcome.steps_executed, 3);
        let result = outcome.result.unwrap();
        assert_eq!(result["add_three"], 16);
        assert_eq!(*workflow.calls.lock(), vec!["add_one", "add_two", "add_three"]);

        let info = store.get_workflow_info(id).await.unwrap();
        assert_eq!(info.status, WorkflowStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_is_retried() {
        let (store, executor) = executor();
        let workflow = CounterWorkflow::default();
        workflow.script(
            "add_two",
            vec![
                Err(StepError::retryable("busy")),
                Err(StepError::retryable("busy")),
            ],
        );

        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(workflow.calls("add_two"), 3);

        let retries = store
            .events(id)
            .into_iter()
            .filter(|e| matches!(e, WorkflowEvent::StepFailed { will_retry: true, .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_and_compensate() {
        let (_store, executor) = executor();
        let workflow = CounterWorkflow::default();
        workflow.script(
            "add_two",
            (0..3).map(|_| Err(StepError::retryable("down"))).collect(),
        );

        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(workflow.calls("add_two"), 3);
        assert_eq!(workflow.calls("add_three"), 0);

        let compensations = workflow.compensations.lock();
        assert_eq!(compensations.len(), 1);
        assert_eq!(compensations[0].step_id.as_deref(), Some("add_two"));
    }

    #[tokio::test]
    async fn test_terminal_error_skips_retries() {
        let (store, executor) = executor();
        let workflow = CounterWorkflow::default();
        workflow.script(
            "add_one",
            vec![Err(StepError::terminal("rejected").with_type("INVALID_INPUT"))],
        );

        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(workflow.calls("add_one"), 1);
        assert_eq!(outcome.error.unwrap().code.as_deref(), Some("INVALID_INPUT"));

        let events = store.events(id);
        assert!(events.contains(&WorkflowEvent::CompensationCompleted));
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_failed_compensation_still_fails_instance() {
        let (store, executor) = executor();
        let workflow = CounterWorkflow {
            fail_compensation: true,
            ..Default::default()
        };
        workflow.script("add_one", vec![Err(StepError::terminal("nope"))]);

        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert!(store
            .events(id)
            .iter()
            .any(|e| matches!(e, WorkflowEvent::CompensationFailed { .. })));
    }

    #[tokio::test]
    async fn test_resume_skips_checkpointed_steps() {
        let (store, executor) = executor();
        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();

        // A previous process finished add_one and crashed inside add_two
        store
            .append_events(
                id,
                1,
                vec![
                    WorkflowEvent::StepStarted {
                        step_id: "add_one".into(),
                        attempt: 1,
                    },
                    WorkflowEvent::StepCompleted {
                        step_id: "add_one".into(),
                        output: json!(100),
                    },
                    WorkflowEvent::StepStarted {
                        step_id: "add_two".into(),
                        attempt: 1,
                    },
                ],
            )
            .await
            .unwrap();
        store
            .update_workflow_status(id, WorkflowStatus::Running, None, None)
            .await
            .unwrap();

        let workflow = CounterWorkflow::default();
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(outcome.steps_replayed, 1);
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(workflow.calls("add_one"), 0);
        assert_eq!(outcome.result.unwrap()["add_three"], 105);

        let second_attempt = store.events(id).into_iter().any(|e| {
            e == WorkflowEvent::StepStarted {
                step_id: "add_two".into(),
                attempt: 2,
            }
        });
        assert!(second_attempt);
    }

    #[tokio::test]
    async fn test_attempt_ceiling_survives_restart() {
        let (store, executor) = executor();
        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();

        // Three attempts started, none recorded a result
        let started: Vec<WorkflowEvent> = (1..=3)
            .map(|attempt| WorkflowEvent::StepStarted {
                step_id: "add_one".into(),
                attempt,
            })
            .collect();
        store.append_events(id, 1, started).await.unwrap();

        let workflow = CounterWorkflow::default();
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(workflow.calls("add_one"), 0);
        assert_eq!(
            outcome.error.unwrap().code.as_deref(),
            Some("ATTEMPTS_EXHAUSTED")
        );
    }

    #[tokio::test]
    async fn test_terminal_instance_is_not_rerun() {
        let (_store, executor) = executor();
        let workflow = CounterWorkflow::default();
        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 1 })
            .await
            .unwrap();

        executor.run_workflow(&workflow, id).await.unwrap();
        let again = executor.run_workflow(&workflow, id).await.unwrap();

        assert!(again.is_completed());
        assert_eq!(again.steps_executed, 0);
        assert_eq!(workflow.calls("add_one"), 1);
    }

    #[tokio::test]
    async fn test_dedup_key_and_abandon() {
        let (store, executor) = executor();
        let id = executor
            .start_workflow::<CounterWorkflow>(Some("key-1"), &CounterInput { start: 0 })
            .await
            .unwrap();

        let err = executor
            .start_workflow::<CounterWorkflow>(Some("key-1"), &CounterInput { start: 0 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Store(StoreError::DuplicateKey { .. })
        ));

        executor
            .abandon_workflow(id, WorkflowError::new("job record missing"))
            .await
            .unwrap();
        assert_eq!(store.find_live_by_key("key-1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_retryable() {
        struct Sleepy {
            calls: Mutex<u32>,
        }

        #[async_trait]
        impl Workflow for Sleepy {
            const TYPE: &'static str = "sleepy";
            type Input = ();

            fn steps(&self) -> &'static [&'static str] {
                &["nap"]
            }

            fn step_options(&self, _step_id: &str) -> StepOptions {
                StepOptions::new(RetryPolicy::fixed(Duration::from_millis(5), 2))
                    .with_attempt_timeout(Duration::from_secs(1))
            }

            async fn execute_step(
                &self,
                _ctx: &StepContext<'_>,
                _input: &(),
            ) -> Result<serde_json::Value, StepError> {
                let call = {
                    let mut calls = self.calls.lock();
                    *calls += 1;
                    *calls
                };
                if call == 1 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(json!("rested"))
            }
        }

        let (_store, executor) = executor();
        let workflow = Sleepy {
            calls: Mutex::new(0),
        };
        let id = executor.start_workflow::<Sleepy>(None, &()).await.unwrap();
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(*workflow.calls.lock(), 2);
    }

    fn flaky_executor() -> (
        Arc<FlakyCheckpointStore>,
        WorkflowExecutor<FlakyCheckpointStore>,
    ) {
        let store = Arc::new(FlakyCheckpointStore::new());
        let config = ExecutorConfig::default()
            .with_store_retry(RetryPolicy::fixed(Duration::from_millis(1), 3));
        (store.clone(), WorkflowExecutor::with_config(store, config))
    }

    #[tokio::test]
    async fn test_rejected_append_is_retried() {
        let (store, executor) = flaky_executor();
        let workflow = CounterWorkflow::default();
        // Appends: WorkflowStarted, StepStarted(add_one), StepCompleted(add_one)
        store.fail_append(3, LostAppend::Rejected);

        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(outcome.result.unwrap()["add_three"], 6);
        assert_eq!(workflow.calls("add_one"), 1);
    }

    #[tokio::test]
    async fn test_applied_append_with_lost_ack_is_not_written_twice() {
        let (store, executor) = flaky_executor();
        let workflow = CounterWorkflow::default();
        store.fail_append(3, LostAppend::Applied);

        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(workflow.calls("add_one"), 1);
        let completions = store
            .inner
            .events(id)
            .into_iter()
            .filter(|e| {
                matches!(e, WorkflowEvent::StepCompleted { step_id, .. } if step_id == "add_one")
            })
            .count();
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn test_status_update_outage_is_retried() {
        let (store, executor) = flaky_executor();
        let workflow = CounterWorkflow::default();

        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();
        store.fail_status_updates(2);
        let outcome = executor.run_workflow(&workflow, id).await.unwrap();

        assert!(outcome.is_completed());
        let info = store.get_workflow_info(id).await.unwrap();
        assert_eq!(info.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_lasting_outage_surfaces_as_transient() {
        let (store, executor) = flaky_executor();
        let workflow = CounterWorkflow::default();

        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();
        store.fail_loads(10);
        let err = executor.run_workflow(&workflow, id).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(workflow.calls("add_one"), 0);
        assert_eq!(
            store.get_workflow_info(id).await.unwrap().status,
            WorkflowStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_type_mismatch_is_rejected() {
        let (_store, executor) = executor();
        let id = executor
            .start_workflow::<CounterWorkflow>(None, &CounterInput { start: 0 })
            .await
            .unwrap();

        struct Other;
        #[async_trait]
        impl Workflow for Other {
            const TYPE: &'static str = "other";
            type Input = CounterInput;
            fn steps(&self) -> &'static [&'static str] {
                &[]
            }
            async fn execute_step(
                &self,
                _ctx: &StepContext<'_>,
                _input: &CounterInput,
            ) -> Result<serde_json::Value, StepError> {
                Ok(json!(null))
            }
        }

        let err = executor.run_workflow(&Other, id).await.unwrap_err();
        assert!(matches!(err, ExecutorError::TypeMismatch { .. }));
    }
}
