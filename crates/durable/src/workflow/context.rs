//! Workflow execution context
//!
//! A fresh [`WorkflowContext`] is handed to the workflow body on every
//! resume. It is the only way the body touches durable state: `step`
//! memoizes results, `sleep` persists wake times. Nothing in the context
//! survives the resume; all continuity comes from the store.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::definition::{error_codes, WorkflowError};
use super::step::StepError;
use crate::clock::Clock;
use crate::persistence::{SleepRecord, StepRecord, StoreError, WorkflowStatus, WorkflowStore};
use crate::reliability::RetryPolicy;

/// Error code for a step or sleep name reached twice in one resume
pub const DUPLICATE_OPERATION: &str = "DUPLICATE_OPERATION";

/// Name of the `iteration`-th occurrence of a step or sleep inside a loop
///
/// ```
/// use lifecycle_durable::iteration_name;
///
/// assert_eq!(iteration_name("check-user-state", 0), "check-user-state#0");
/// assert_eq!(iteration_name("wait-for-1-month", 2), "wait-for-1-month#2");
/// ```
pub fn iteration_name(base: &str, iteration: u64) -> String {
    format!("{base}#{iteration}")
}

/// Why a workflow body stopped
///
/// Returned through `?` from [`WorkflowContext::step`] and
/// [`WorkflowContext::sleep`]. The executor turns each variant into a
/// status transition.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowInterrupt {
    /// A sleep has not elapsed yet
    #[error("suspended on '{sleep_name}' until {wake_at}")]
    Suspended {
        sleep_name: String,
        wake_at: DateTime<Utc>,
    },

    /// The instance was cancelled
    #[error("workflow cancelled")]
    Cancelled,

    /// Unrecoverable failure; the instance becomes Failed
    #[error("workflow failed: {0}")]
    Failed(WorkflowError),

    /// Persistence failure; the resume is abandoned without a transition
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The body exceeded the per-resume operation budget
    #[error("more than {0} step/sleep calls in a single resume")]
    OperationLimit(usize),

    /// Another resume took over the instance lease
    #[error("instance lease lost")]
    LeaseLost,
}

impl WorkflowInterrupt {
    /// Shorthand for failing the instance with a coded error
    pub fn fail(message: impl Into<String>, code: &str) -> Self {
        Self::Failed(WorkflowError::new(message).with_code(code))
    }
}

/// What a single resume did
#[derive(Debug, Clone, Default)]
pub struct Journal {
    /// Step and sleep names in the order they were reached
    pub visited: Vec<String>,
    /// Steps whose body ran in this resume
    pub steps_executed: u32,
    /// Steps answered from a stored record
    pub steps_replayed: u32,
    /// Sleep records created in this resume
    pub sleeps_scheduled: u32,
}

/// Per-resume handle given to [`Workflow::run`](super::Workflow::run)
pub struct WorkflowContext {
    instance_id: Uuid,
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    max_operations: usize,
    lease: Option<LeaseHold>,
    journal: Mutex<Journal>,
    seen: Mutex<HashSet<String>>,
}

/// Lease the resume runs under, re-confirmed before every step body
#[derive(Debug, Clone, Copy)]
struct LeaseHold {
    owner: Uuid,
    ttl: chrono::Duration,
}

impl WorkflowContext {
    pub(crate) fn new(
        instance_id: Uuid,
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        retry_policy: RetryPolicy,
        max_operations: usize,
    ) -> Self {
        Self {
            instance_id,
            store,
            clock,
            retry_policy,
            max_operations,
            lease: None,
            journal: Mutex::new(Journal::default()),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Fence step bodies on `owner` still holding the instance lease
    pub(crate) fn with_lease(mut self, owner: Uuid, ttl: chrono::Duration) -> Self {
        self.lease = Some(LeaseHold { owner, ttl });
        self
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Current time from the engine clock
    ///
    /// Not replay-stable. Use it inside a step body and let the step
    /// record the value if later code depends on it.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `f` at most once for this instance under the default retry policy
    ///
    /// On replay the recorded result is returned and `f` is not called.
    pub async fn step<T, F, Fut, E>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<T, WorkflowInterrupt>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: Into<StepError> + Send,
    {
        let policy = self.retry_policy.clone();
        self.step_with_retry(name, &policy, f).await
    }

    /// Like [`step`](Self::step) with an explicit retry policy
    pub async fn step_with_retry<T, F, Fut, E>(
        &self,
        name: impl Into<String>,
        policy: &RetryPolicy,
        mut f: F,
    ) -> Result<T, WorkflowInterrupt>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: Into<StepError> + Send,
    {
        let name = name.into();
        self.enter(&name).await?;

        if let Some(record) = self.store.get_step(self.instance_id, &name).await? {
            self.journal.lock().steps_replayed += 1;
            debug!(instance_id = %self.instance_id, step = %name, "step replayed");
            return decode_result(&name, record.result);
        }

        let mut attempt = 1;
        let value = loop {
            self.confirm_lease().await?;
            match f().await {
                Ok(value) => break value,
                Err(err) => {
                    let err: StepError = err.into();
                    if !policy.should_retry(&err, attempt) {
                        error!(
                            instance_id = %self.instance_id,
                            step = %name,
                            attempt,
                            error = %err,
                            "step failed"
                        );
                        return Err(WorkflowInterrupt::fail(
                            format!("step '{name}' failed after {attempt} attempt(s): {err}"),
                            error_codes::STEP_FAILED,
                        ));
                    }

                    let delay = policy.delay_for_attempt(attempt + 1);
                    warn!(
                        instance_id = %self.instance_id,
                        step = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    self.check_cancelled().await?;
                }
            }
        };

        let result = serde_json::to_value(&value).map_err(|e| {
            WorkflowInterrupt::fail(
                format!("step '{name}' produced an unserializable result: {e}"),
                error_codes::STEP_RESULT_INVALID,
            )
        })?;

        let record = StepRecord {
            instance_id: self.instance_id,
            name: name.clone(),
            result,
            completed_at: self.clock.now(),
        };

        self.journal.lock().steps_executed += 1;
        match self.store.put_step(record).await {
            Ok(()) => {
                debug!(instance_id = %self.instance_id, step = %name, attempt, "step recorded");
                Ok(value)
            }
            Err(StoreError::Conflict { .. }) => {
                // Another resume recorded this step first; its result wins.
                warn!(instance_id = %self.instance_id, step = %name, "step already recorded, adopting stored result");
                let winner = self
                    .store
                    .get_step(self.instance_id, &name)
                    .await?
                    .ok_or_else(|| StoreError::Inconsistent(format!("step '{name}' vanished")))?;
                decode_result(&name, winner.result)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Suspend until `duration` after the first time this sleep is reached
    ///
    /// The wake time is fixed when the sleep record is created; later
    /// resumes compare against it and never push it back.
    pub async fn sleep(
        &self,
        name: impl Into<String>,
        duration: Duration,
    ) -> Result<(), WorkflowInterrupt> {
        let name = name.into();
        self.enter(&name).await?;

        let now = self.clock.now();
        let record = match self.store.get_sleep(self.instance_id, &name).await? {
            Some(record) => record,
            None => {
                let wake_at = chrono::Duration::from_std(duration)
                    .ok()
                    .and_then(|delta| now.checked_add_signed(delta))
                    .ok_or_else(|| {
                        WorkflowInterrupt::fail(
                            format!("sleep '{name}' duration {duration:?} is out of range"),
                            error_codes::INVALID_DURATION,
                        )
                    })?;

                let record = SleepRecord {
                    instance_id: self.instance_id,
                    name: name.clone(),
                    wake_at,
                    created_at: now,
                };

                match self.store.put_sleep(record.clone()).await {
                    Ok(()) => {
                        self.journal.lock().sleeps_scheduled += 1;
                        debug!(instance_id = %self.instance_id, sleep = %name, %wake_at, "sleep scheduled");
                        record
                    }
                    Err(StoreError::Conflict { .. }) => self
                        .store
                        .get_sleep(self.instance_id, &name)
                        .await?
                        .ok_or_else(|| {
                            StoreError::Inconsistent(format!("sleep '{name}' vanished"))
                        })?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if now >= record.wake_at {
            debug!(instance_id = %self.instance_id, sleep = %name, "sleep elapsed");
            Ok(())
        } else {
            Err(WorkflowInterrupt::Suspended {
                sleep_name: name,
                wake_at: record.wake_at,
            })
        }
    }

    /// Consume the context and return what this resume did
    pub fn into_journal(self) -> Journal {
        self.journal.into_inner()
    }

    /// Snapshot of the journal so far
    pub fn journal(&self) -> Journal {
        self.journal.lock().clone()
    }

    async fn enter(&self, name: &str) -> Result<(), WorkflowInterrupt> {
        self.check_cancelled().await?;

        if !self.seen.lock().insert(name.to_string()) {
            return Err(WorkflowInterrupt::fail(
                format!("'{name}' was reached twice in one resume"),
                DUPLICATE_OPERATION,
            ));
        }

        let mut journal = self.journal.lock();
        if journal.visited.len() >= self.max_operations {
            return Err(WorkflowInterrupt::OperationLimit(self.max_operations));
        }
        journal.visited.push(name.to_string());
        Ok(())
    }

    async fn confirm_lease(&self) -> Result<(), WorkflowInterrupt> {
        let Some(lease) = self.lease else {
            return Ok(());
        };

        let expires_at = lease_expiry(self.clock.now(), lease.ttl);
        if self
            .store
            .renew_lease(self.instance_id, lease.owner, expires_at)
            .await?
        {
            Ok(())
        } else {
            warn!(instance_id = %self.instance_id, "lease taken over, stopping before step body");
            Err(WorkflowInterrupt::LeaseLost)
        }
    }

    async fn check_cancelled(&self) -> Result<(), WorkflowInterrupt> {
        let instance = self.store.get_instance(self.instance_id).await?;
        if instance.status == WorkflowStatus::Cancelled {
            debug!(instance_id = %self.instance_id, "cancellation observed");
            return Err(WorkflowInterrupt::Cancelled);
        }
        Ok(())
    }
}

/// Expiry of a lease taken or renewed at `now`
pub(crate) fn lease_expiry(now: DateTime<Utc>, ttl: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn decode_result<T: DeserializeOwned>(
    name: &str,
    value: serde_json::Value,
) -> Result<T, WorkflowInterrupt> {
    serde_json::from_value(value).map_err(|e| {
        WorkflowInterrupt::fail(
            format!("recorded result of step '{name}' does not decode: {e}"),
            error_codes::STEP_RESULT_INVALID,
        )
    })
}
