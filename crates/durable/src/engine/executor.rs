//! Workflow executor with replay support
//!
//! The `WorkflowExecutor` is responsible for:
//! - Submitting new workflow instances
//! - Resuming instances by replaying the body against recorded steps and sleeps
//! - Translating how a body stopped into a status transition
//! - Cancelling instances

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::persistence::{StatusUpdate, StoreError, WorkflowInstance, WorkflowStatus, WorkflowStore};
use crate::reliability::RetryPolicy;
use crate::workflow::{
    error_codes, lease_expiry, Journal, ValidationError, Workflow, WorkflowContext,
    WorkflowError, WorkflowInterrupt,
};

use super::registry::{RegistryError, WorkflowRegistry};

/// Configuration for the workflow executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum step/sleep calls in one resume (for safety)
    pub max_operations_per_resume: usize,

    /// Retry policy applied to steps that don't bring their own
    pub step_retry: RetryPolicy,

    /// How long a resume holds the instance lease without renewing it
    ///
    /// A running resume renews every third of this period.
    #[serde(with = "crate::serde_millis")]
    pub lease_ttl: Duration,

    /// How long a resume waits for a held lease before giving up
    #[serde(with = "crate::serde_millis")]
    pub lease_wait: Duration,

    /// Poll interval while waiting for a lease
    #[serde(with = "crate::serde_millis")]
    pub lease_poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_operations_per_resume: 100_000,
            step_retry: RetryPolicy::exponential(),
            lease_ttl: Duration::from_secs(300),
            lease_wait: Duration::from_secs(5),
            lease_poll_interval: Duration::from_millis(50),
        }
    }
}

impl ExecutorConfig {
    pub fn with_step_retry(mut self, policy: RetryPolicy) -> Self {
        self.step_retry = policy;
        self
    }

    pub fn with_max_operations(mut self, max: usize) -> Self {
        self.max_operations_per_resume = max;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_lease_wait(mut self, wait: Duration, poll_interval: Duration) -> Self {
        self.lease_wait = wait;
        self.lease_poll_interval = poll_interval;
        self
    }
}

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Payload rejected at submit
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Workflow instance not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Another resume holds the instance lease
    #[error("workflow {0} is being resumed elsewhere")]
    InstanceBusy(Uuid),

    /// Too many step/sleep calls in one resume; the instance is Failed
    #[error("workflow {0} exceeded {1} operations in a single resume")]
    TooManyOperations(Uuid, usize),

    /// The lease was taken over mid-resume; the resume stopped before its next step
    #[error("workflow {0} lost its lease to another resume")]
    LeaseLost(Uuid),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExecutorError {
    fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::InstanceNotFound(id) => Self::WorkflowNotFound(id),
            other => Self::Store(other),
        }
    }
}

/// Result of a resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeReport {
    pub instance_id: Uuid,

    /// Status after the resume
    pub status: WorkflowStatus,

    /// Pending wake time when Sleeping
    pub wake_at: Option<DateTime<Utc>>,

    /// Pending sleep when Sleeping
    pub sleep_name: Option<String>,

    /// Failure when Failed
    pub error: Option<WorkflowError>,

    /// Step and sleep names reached, in order
    pub visited: Vec<String>,

    pub steps_executed: u32,
    pub steps_replayed: u32,
    pub sleeps_scheduled: u32,
}

impl ResumeReport {
    fn new(instance: WorkflowInstance, journal: Journal) -> Self {
        Self {
            instance_id: instance.id,
            status: instance.status,
            wake_at: instance.wake_at,
            sleep_name: instance.sleep_name,
            error: instance.error,
            visited: journal.visited,
            steps_executed: journal.steps_executed,
            steps_replayed: journal.steps_replayed,
            sleeps_scheduled: journal.sleeps_scheduled,
        }
    }

    /// True when the resume ran no body code at all
    pub fn is_noop(&self) -> bool {
        self.visited.is_empty()
    }
}

/// Renewal task for a held lease, stopped when dropped
struct LeaseHeartbeat(tokio::task::JoinHandle<()>);

impl Drop for LeaseHeartbeat {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Workflow executor
///
/// The executor is the only thing that moves an instance between states.
/// Every resume runs the body from the top with a fresh
/// [`WorkflowContext`]; recorded steps and sleeps make the replay cheap and
/// side-effect free up to the first unrecorded operation.
///
/// # Example
///
/// ```ignore
/// use lifecycle_durable::prelude::*;
///
/// let store = Arc::new(InMemoryWorkflowStore::new());
/// let mut executor = WorkflowExecutor::new(store);
/// executor.register(MyWorkflow::new(deps));
///
/// let id = executor.submit("my_workflow", json!({ "email": "ann@example.com" })).await?;
/// let report = executor.resume(id).await?;
/// ```
pub struct WorkflowExecutor {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    registry: WorkflowRegistry,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create a new executor with the given store and the system clock
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            registry: WorkflowRegistry::new(),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a workflow definition
    pub fn register<W: Workflow>(&mut self, workflow: W) {
        self.registry.register(workflow);
        info!(workflow_type = W::TYPE, "registered workflow type");
    }

    /// Get a reference to the store
    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Create a Pending instance after validating its payload
    ///
    /// Nothing is persisted when validation fails.
    #[instrument(skip(self, input))]
    pub async fn submit(
        &self,
        workflow_type: &str,
        input: serde_json::Value,
    ) -> Result<Uuid, ExecutorError> {
        let workflow = self.registry.get(workflow_type)?;
        if let Err(err) = workflow.validate_input(&input) {
            warn!(error = %err, "rejected workflow input");
            return Err(err.into());
        }

        let instance = WorkflowInstance::new(workflow_type, input, self.clock.now());
        let instance_id = instance.id;
        self.store.create_instance(instance).await?;

        info!(%instance_id, "submitted workflow");
        Ok(instance_id)
    }

    /// Typed variant of [`submit`](Self::submit)
    pub async fn submit_typed<W: Workflow>(&self, input: &W::Input) -> Result<Uuid, ExecutorError> {
        let input = serde_json::to_value(input)?;
        self.submit(W::TYPE, input).await
    }

    /// Resume an instance
    ///
    /// Safe to call early, late, or repeatedly. Failed and Cancelled
    /// instances return immediately without running any body code.
    #[instrument(skip(self))]
    pub async fn resume(&self, instance_id: Uuid) -> Result<ResumeReport, ExecutorError> {
        let instance = self.get_instance(instance_id).await?;
        if instance.status.is_terminal() {
            debug!(status = %instance.status, "instance is terminal, nothing to do");
            return Ok(ResumeReport::new(instance, Journal::default()));
        }

        let token = Uuid::now_v7();
        self.acquire_lease(instance_id, token).await?;

        let heartbeat = self.spawn_heartbeat(instance_id, token);
        let outcome = self.resume_leased(instance_id, token).await;
        drop(heartbeat);

        if let Err(e) = self.store.release_lease(instance_id, token).await {
            warn!(error = %e, "failed to release lease");
        }
        outcome
    }

    /// Mark an instance Cancelled
    ///
    /// A resume in flight stops at its next step or sleep boundary.
    #[instrument(skip(self))]
    pub async fn cancel(&self, instance_id: Uuid) -> Result<(), ExecutorError> {
        self.store
            .cancel_instance(instance_id, self.clock.now())
            .await
            .map_err(ExecutorError::from_store)?;
        info!("workflow cancelled");
        Ok(())
    }

    /// Read-only view of an instance
    pub async fn get_instance(&self, instance_id: Uuid) -> Result<WorkflowInstance, ExecutorError> {
        self.store
            .get_instance(instance_id)
            .await
            .map_err(ExecutorError::from_store)
    }

    fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.lease_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(5))
    }

    async fn acquire_lease(&self, instance_id: Uuid, token: Uuid) -> Result<(), ExecutorError> {
        let ttl = self.lease_ttl();
        let deadline = tokio::time::Instant::now() + self.config.lease_wait;

        loop {
            let now = self.clock.now();
            if self
                .store
                .acquire_lease(instance_id, token, now, lease_expiry(now, ttl))
                .await
                .map_err(ExecutorError::from_store)?
            {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                warn!("lease held by another resume");
                return Err(ExecutorError::InstanceBusy(instance_id));
            }
            tokio::time::sleep(self.config.lease_poll_interval).await;
        }
    }

    /// Keep renewing the lease while the body runs
    fn spawn_heartbeat(&self, instance_id: Uuid, owner: Uuid) -> LeaseHeartbeat {
        let store = self.store.clone();
        let clock = self.clock.clone();
        let ttl = self.lease_ttl();
        let period = (self.config.lease_ttl / 3).max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store
                    .renew_lease(instance_id, owner, lease_expiry(clock.now(), ttl))
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(%instance_id, "lease taken over, stopping renewal");
                        break;
                    }
                    Err(e) => warn!(%instance_id, error = %e, "failed to renew lease"),
                }
            }
        });
        LeaseHeartbeat(handle)
    }

    async fn resume_leased(
        &self,
        instance_id: Uuid,
        token: Uuid,
    ) -> Result<ResumeReport, ExecutorError> {
        // Re-read under the lease: a previous holder may have moved it on.
        let instance = self.get_instance(instance_id).await?;
        if instance.status.is_terminal() {
            return Ok(ResumeReport::new(instance, Journal::default()));
        }

        let workflow = match self.registry.get(&instance.workflow_type) {
            Ok(workflow) => workflow,
            Err(e) => {
                error!(%instance_id, workflow_type = %instance.workflow_type, "unknown workflow type");
                let err = WorkflowError::new(e.to_string()).with_code(error_codes::UNKNOWN_WORKFLOW);
                self.store
                    .update_status(instance_id, StatusUpdate::failed(err, self.clock.now()))
                    .await?;
                return Err(e.into());
            }
        };

        if !self
            .store
            .update_status(instance_id, StatusUpdate::running(self.clock.now()))
            .await?
        {
            let instance = self.get_instance(instance_id).await?;
            return Ok(ResumeReport::new(instance, Journal::default()));
        }

        let ctx = WorkflowContext::new(
            instance_id,
            self.store.clone(),
            self.clock.clone(),
            self.config.step_retry.clone(),
            self.config.max_operations_per_resume,
        )
        .with_lease(token, self.lease_ttl());

        let interrupt = match workflow.run_json(&ctx, instance.input).await {
            Ok(never) => match never {},
            Err(interrupt) => interrupt,
        };
        let journal = ctx.into_journal();

        match interrupt {
            WorkflowInterrupt::Suspended { sleep_name, wake_at } => {
                let applied = self
                    .store
                    .update_status(
                        instance_id,
                        StatusUpdate::sleeping(&sleep_name, wake_at, self.clock.now()),
                    )
                    .await?;
                if applied {
                    info!(sleep = %sleep_name, %wake_at, "workflow sleeping");
                }
            }
            WorkflowInterrupt::Cancelled => {
                info!("workflow stopped by cancellation");
            }
            WorkflowInterrupt::Failed(err) => {
                error!(
                    %instance_id,
                    code = err.code.as_deref().unwrap_or("UNKNOWN"),
                    error = %err.message,
                    "workflow failed"
                );
                self.store
                    .update_status(instance_id, StatusUpdate::failed(err, self.clock.now()))
                    .await?;
            }
            WorkflowInterrupt::Store(e) => {
                error!(%instance_id, error = %e, "store error during resume");
                return Err(ExecutorError::Store(e));
            }
            WorkflowInterrupt::OperationLimit(limit) => {
                error!(%instance_id, limit, "operation limit exceeded");
                let err = WorkflowError::new(format!(
                    "more than {limit} step/sleep calls in a single resume"
                ))
                .with_code(error_codes::OPERATION_LIMIT);
                self.store
                    .update_status(instance_id, StatusUpdate::failed(err, self.clock.now()))
                    .await?;
                return Err(ExecutorError::TooManyOperations(instance_id, limit));
            }
            WorkflowInterrupt::LeaseLost => {
                warn!(%instance_id, "lease lost mid-resume, leaving the instance to its new holder");
                return Err(ExecutorError::LeaseLost(instance_id));
            }
        }

        let instance = self.get_instance(instance_id).await?;
        debug!(
            status = %instance.status,
            executed = journal.steps_executed,
            replayed = journal.steps_replayed,
            "resume finished"
        );
        Ok(ResumeReport::new(instance, journal))
    }
}
