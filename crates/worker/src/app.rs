// Process wiring
//
// Builds every collaborator once and hands them to the dispatcher, the
// workflow and the intake routes.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use axum::Router;
use timeglow_core::{PipelineConfig, ProviderMode, RestorationProvider};
use timeglow_durable::{
    CheckpointStore, ExecutorConfig, InMemoryCheckpointStore, PostgresCheckpointStore,
    RunnerConfig, WorkflowExecutor,
};
use timeglow_gemini::{GeminiProvider, PassthroughProvider};
use timeglow_storage::{FsObjectStore, InMemoryStore, PgCreditLedger, PgStore};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::billing::BillingHandler;
use crate::dispatcher::Dispatcher;
use crate::intake::{self, IntakeState};
use crate::workflow::{Collaborators, PipelineRunner, RestorationWorkflow, WorkflowSettings};

const DB_MAX_CONNECTIONS: u32 = 10;

pub struct Pipeline {
    pub dispatcher: Arc<Dispatcher>,
    pub runner: Arc<PipelineRunner>,
    pub billing: Arc<BillingHandler>,
    pub collaborators: Collaborators,
}

impl Pipeline {
    pub fn new(
        checkpoints: Arc<dyn CheckpointStore>,
        collaborators: Collaborators,
        settings: WorkflowSettings,
        runner_config: RunnerConfig,
    ) -> Self {
        let executor = Arc::new(WorkflowExecutor::with_config(
            checkpoints,
            ExecutorConfig::default().with_store_retry(settings.checkpoint_retry()),
        ));
        let workflow = Arc::new(RestorationWorkflow::new(collaborators.clone(), settings));
        let runner = Arc::new(PipelineRunner::new(executor, workflow, runner_config));

        Self {
            dispatcher: Arc::new(Dispatcher::new(collaborators.clone(), runner.clone())),
            billing: Arc::new(BillingHandler::new(collaborators.ledger.clone())),
            runner,
            collaborators,
        }
    }

    /// Postgres when `DATABASE_URL` is set, in-memory otherwise
    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        let objects = Arc::new(FsObjectStore::new(config.object_store_root.clone()));
        let provider = provider_for(config)?;
        info!(provider = provider.name(), "restoration provider selected");

        let (checkpoints, collaborators): (Arc<dyn CheckpointStore>, Collaborators) =
            match &config.database_url {
                Some(url) => {
                    let pool = timeglow_storage::connect(url, DB_MAX_CONNECTIONS)
                        .await
                        .context("Failed to connect to database")?;
                    timeglow_storage::run_migrations(&pool)
                        .await
                        .context("Failed to run migrations")?;

                    let store = PgStore::new(pool.clone());
                    let ledger = Arc::new(PgCreditLedger::new(
                        store.clone(),
                        config.credit_policy.clone(),
                    ));
                    (
                        Arc::new(PostgresCheckpointStore::new(pool)),
                        Collaborators::with_store(Arc::new(store), ledger, objects, provider),
                    )
                }
                None => {
                    warn!("DATABASE_URL not set, job state is kept in memory only");
                    let store = Arc::new(InMemoryStore::with_policy(config.credit_policy.clone()));
                    (
                        Arc::new(InMemoryCheckpointStore::new()),
                        Collaborators::with_store(store.clone(), store, objects, provider),
                    )
                }
            };

        let runner_config =
            RunnerConfig::default().with_max_concurrency(config.max_concurrent_jobs);
        Ok(Self::new(
            checkpoints,
            collaborators,
            WorkflowSettings::from_config(config),
            runner_config,
        ))
    }

    pub fn router(&self) -> Router {
        intake::routes(IntakeState {
            dispatcher: self.dispatcher.clone(),
            billing: self.billing.clone(),
            jobs: self.collaborators.jobs.clone(),
            results: self.collaborators.results.clone(),
        })
        .layer(TraceLayer::new_for_http())
    }
}

fn provider_for(config: &PipelineConfig) -> Result<Arc<dyn RestorationProvider>> {
    match (&config.provider_mode, &config.gemini) {
        (ProviderMode::Gemini, Some(settings)) => Ok(Arc::new(
            GeminiProvider::from_settings(settings).with_timeout(config.provider_timeout),
        )),
        (ProviderMode::Gemini, None) => bail!("gemini provider selected without GEMINI_API_KEY"),
        (ProviderMode::Passthrough, _) => {
            warn!("passthrough provider enabled, restorations return the original image");
            Ok(Arc::new(PassthroughProvider::new()))
        }
    }
}
