//! Bounded-concurrency runner with crash recovery and graceful shutdown

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::engine::{ExecutorError, RunOutcome, WorkflowExecutor};
use crate::persistence::{CheckpointStore, StoreError, WorkflowStatus};
use crate::workflow::Workflow;

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum instances executing at once; further spawns wait for a slot
    pub max_concurrency: usize,

    /// How long `shutdown` waits for in-flight instances
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Times an instance is run again after the checkpoint store stayed
    /// unreachable through the executor's own retries
    pub max_redrives: u32,

    /// Pause before the first re-drive; doubles for each one after
    #[serde(with = "duration_millis")]
    pub redrive_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            shutdown_timeout: Duration::from_secs(30),
            max_redrives: 3,
            redrive_delay: Duration::from_secs(2),
        }
    }
}

impl RunnerConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_redrives(mut self, max_redrives: u32, delay: Duration) -> Self {
        self.max_redrives = max_redrives;
        self.redrive_delay = delay;
        self
    }

    fn redrive_backoff(&self, redrive: u32) -> Duration {
        self.redrive_delay
            .saturating_mul(2u32.saturating_pow(redrive.saturating_sub(1)))
    }
}

/// Runner errors
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Instance is already executing in this process
    #[error("workflow {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("runner is shutting down")]
    ShuttingDown,

    #[error("graceful shutdown timed out with {remaining} instance(s) in flight")]
    ShutdownTimeout { remaining: usize },
}

/// Join handle for one spawned instance
pub type RunHandle = JoinHandle<Result<RunOutcome, RunnerError>>;

/// Removes an instance from the in-flight set however its task ends
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    workflow_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.workflow_id);
    }
}

/// Runs instances of one workflow type as tokio tasks
///
/// Each instance gets its own task; a semaphore bounds how many execute at
/// once. The same instance is never run twice concurrently in one process.
pub struct WorkflowRunner<W: Workflow, S: CheckpointStore + ?Sized> {
    executor: Arc<WorkflowExecutor<S>>,
    workflow: Arc<W>,
    config: RunnerConfig,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<W: Workflow, S: CheckpointStore + ?Sized> WorkflowRunner<W, S> {
    pub fn new(executor: Arc<WorkflowExecutor<S>>, workflow: Arc<W>, config: RunnerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            executor,
            workflow,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown_tx,
        }
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor<S>> {
        &self.executor
    }

    pub fn workflow(&self) -> &Arc<W> {
        &self.workflow
    }

    /// Instances spawned and not yet finished (running or waiting for a slot)
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run an instance in the background.
    ///
    /// A run cut short by an unreachable checkpoint store is re-driven from
    /// its checkpoints up to `max_redrives` times. Other engine errors, and
    /// store outages that outlast the re-drives, are logged and returned
    /// through the handle; the instance stays live and is picked up by the
    /// next `resume_incomplete`.
    pub fn spawn(&self, workflow_id: Uuid) -> Result<RunHandle, RunnerError> {
        if self.is_shutting_down() {
            return Err(RunnerError::ShuttingDown);
        }
        if !self.in_flight.lock().insert(workflow_id) {
            return Err(RunnerError::AlreadyRunning(workflow_id));
        }

        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            workflow_id,
        };
        let executor = self.executor.clone();
        let workflow = self.workflow.clone();
        let permits = self.permits.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Ok(tokio::spawn(async move {
            let _guard = guard;

            let _permit = tokio::select! {
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Err(RunnerError::ShuttingDown),
                },
                _ = shutdown_rx.wait_for(|stopping| *stopping) => {
                    debug!(%workflow_id, "shutdown before instance acquired a slot");
                    return Err(RunnerError::ShuttingDown);
                }
            };

            let mut redrives = 0;
            loop {
                let error = match executor.run_workflow(workflow.as_ref(), workflow_id).await {
                    Ok(outcome) => {
                        debug!(%workflow_id, status = %outcome.status, "instance finished");
                        return Ok(outcome);
                    }
                    Err(e) if e.is_transient() && redrives < config.max_redrives => e,
                    Err(e) => {
                        error!(%workflow_id, redrives, error = %e, "instance run aborted");
                        return Err(e.into());
                    }
                };

                redrives += 1;
                let delay = config.redrive_backoff(redrives);
                warn!(
                    %workflow_id,
                    redrives,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "checkpoint store unavailable, re-driving instance"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.wait_for(|stopping| *stopping) => {
                        debug!(%workflow_id, "shutdown while waiting to re-drive");
                        return Err(error.into());
                    }
                }
            }
        }))
    }

    /// Spawn every pending or running instance of this workflow type.
    ///
    /// Called on startup to continue instances a previous process left
    /// unfinished.
    #[instrument(skip(self), fields(workflow_type = W::TYPE))]
    pub async fn resume_incomplete(&self) -> Result<Vec<RunHandle>, RunnerError> {
        let incomplete = self
            .executor
            .store()
            .list_workflows(W::TYPE, &[WorkflowStatus::Pending, WorkflowStatus::Running])
            .await?;

        let mut handles = Vec::with_capacity(incomplete.len());
        for info in incomplete {
            match self.spawn(info.id) {
                Ok(handle) => handles.push(handle),
                Err(RunnerError::AlreadyRunning(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if !handles.is_empty() {
            info!(resumed = handles.len(), "resumed incomplete workflows");
        }
        Ok(handles)
    }

    /// Stop accepting instances and wait for in-flight ones to finish.
    ///
    /// Instances still waiting for a slot are released without running; they
    /// resume on the next start.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), RunnerError> {
        info!("Initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let remaining = self.in_flight();
            if remaining == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, "Shutdown timeout reached");
                return Err(RunnerError::ShutdownTimeout { remaining });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!("Runner stopped");
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
