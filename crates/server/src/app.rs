// Service wiring

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use lifecycle_durable::{
    Clock, ExecutorConfig, InMemoryWorkflowStore, PostgresWorkflowStore, SystemClock,
    WorkflowExecutor, WorkflowStore,
};
use lifecycle_onboarding::{
    ActivityEvaluator, HttpMailTransport, InMemoryUserDirectory, LogMailTransport, MailTransport,
    NotificationDispatcher, OnboardingConfig, OnboardingWorkflow, PgUserDirectory, UserDirectory,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;

use crate::api::{self, AppState};
use crate::config::ServerConfig;

const MAX_DB_CONNECTIONS: u32 = 10;

/// Collaborators of the onboarding workflow
pub struct Backends {
    pub store: Arc<dyn WorkflowStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub transport: Arc<dyn MailTransport>,
}

impl Backends {
    /// Connect to whatever the configuration names
    pub async fn from_config(config: &ServerConfig) -> Result<Self> {
        let (store, directory): (Arc<dyn WorkflowStore>, Arc<dyn UserDirectory>) =
            match &config.database_url {
                Some(url) => {
                    let pool = PgPoolOptions::new()
                        .max_connections(MAX_DB_CONNECTIONS)
                        .connect(url)
                        .await
                        .context("Failed to connect to database")?;
                    tracing::info!("Connected to database");

                    let store = PostgresWorkflowStore::new(pool.clone());
                    store
                        .migrate()
                        .await
                        .context("Failed to run workflow migrations")?;
                    (Arc::new(store), Arc::new(PgUserDirectory::new(pool)))
                }
                None => {
                    tracing::warn!("DATABASE_URL not set, using in-memory store and user directory");
                    (
                        Arc::new(InMemoryWorkflowStore::new()),
                        Arc::new(InMemoryUserDirectory::new()),
                    )
                }
            };

        let transport: Arc<dyn MailTransport> = match &config.mail {
            Some(mail) => {
                tracing::info!(endpoint = %mail.api_url, from = %mail.from, "Using HTTP mail transport");
                Arc::new(HttpMailTransport::new(mail.to_http_config())?)
            }
            None => {
                tracing::info!("Mail API not configured, emails are logged only");
                Arc::new(LogMailTransport)
            }
        };

        Ok(Self {
            store,
            directory,
            transport,
        })
    }
}

/// Executor with the onboarding workflow registered
pub fn onboarding_executor(
    backends: Backends,
    clock: Arc<dyn Clock>,
    executor_config: ExecutorConfig,
    onboarding: OnboardingConfig,
) -> WorkflowExecutor {
    let evaluator = Arc::new(ActivityEvaluator::new(backends.directory, clock.clone()));
    let dispatcher = Arc::new(NotificationDispatcher::new(backends.transport, clock.clone()));

    let mut executor = WorkflowExecutor::new(backends.store)
        .with_clock(clock)
        .with_config(executor_config);
    executor.register(OnboardingWorkflow::new(evaluator, dispatcher).with_config(onboarding));
    executor
}

/// Build the production executor from configuration
pub async fn build_executor(config: &ServerConfig) -> Result<Arc<WorkflowExecutor>> {
    let backends = Backends::from_config(config).await?;
    Ok(Arc::new(onboarding_executor(
        backends,
        Arc::new(SystemClock),
        ExecutorConfig::default(),
        config.onboarding.clone(),
    )))
}

/// Full HTTP application
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(api::meta_routes())
        .merge(api::routes(state))
        .layer(TraceLayer::new_for_http())
}
