//! WorkflowStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::WorkflowError;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow instance not found
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// A record with this key already exists (compare-and-set lost)
    #[error("record '{name}' already exists for instance {instance_id}")]
    Conflict { instance_id: Uuid, name: String },

    /// Stored data contradicts itself
    #[error("inconsistent store state: {0}")]
    Inconsistent(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Workflow instance status
///
/// There is no completed state: lifecycle workflows loop until cancelled
/// or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, body not entered yet
    Pending,

    /// A resume is executing the body
    Running,

    /// Suspended on a sleep until `wake_at`
    Sleeping,

    /// Stopped by an unrecoverable error
    Failed,

    /// Stopped by request
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal instances are never resumed again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(status: &str) -> Result<Self, StoreError> {
        match status {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "sleeping" => Ok(Self::Sleeping),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StoreError::Database(format!(
                "Unknown workflow status: {}",
                status
            ))),
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A workflow instance row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_type: String,
    pub input: serde_json::Value,
    pub status: WorkflowStatus,
    /// Set while Sleeping
    pub wake_at: Option<DateTime<Utc>>,
    /// Name of the pending sleep while Sleeping
    pub sleep_name: Option<String>,
    /// Set when Failed
    pub error: Option<WorkflowError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lease_owner: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// New Pending instance with a time-ordered id
    pub fn new(workflow_type: impl Into<String>, input: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_type: workflow_type.into(),
            input,
            status: WorkflowStatus::Pending,
            wake_at: None,
            sleep_name: None,
            error: None,
            created_at: now,
            updated_at: now,
            lease_owner: None,
            lease_expires_at: None,
        }
    }
}

/// Memoized result of a completed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub instance_id: Uuid,
    pub name: String,
    pub result: serde_json::Value,
    pub completed_at: DateTime<Utc>,
}

/// A scheduled sleep; `wake_at` never changes once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    pub instance_id: Uuid,
    pub name: String,
    pub wake_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Status transition applied by [`WorkflowStore::update_status`]
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: WorkflowStatus,
    pub wake_at: Option<DateTime<Utc>>,
    pub sleep_name: Option<String>,
    pub error: Option<WorkflowError>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn running(at: DateTime<Utc>) -> Self {
        Self {
            status: WorkflowStatus::Running,
            wake_at: None,
            sleep_name: None,
            error: None,
            at,
        }
    }

    pub fn sleeping(sleep_name: impl Into<String>, wake_at: DateTime<Utc>, at: DateTime<Utc>) -> Self {
        Self {
            status: WorkflowStatus::Sleeping,
            wake_at: Some(wake_at),
            sleep_name: Some(sleep_name.into()),
            error: None,
            at,
        }
    }

    pub fn failed(error: WorkflowError, at: DateTime<Utc>) -> Self {
        Self {
            status: WorkflowStatus::Failed,
            wake_at: None,
            sleep_name: None,
            error: Some(error),
            at,
        }
    }
}

/// Persistence for workflow instances, step records, and sleep records
///
/// Every operation is atomic per key and safe to call concurrently.
/// `put_step` and `put_sleep` are compare-and-set: they never overwrite an
/// existing record and report [`StoreError::Conflict`] instead.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // =========================================================================
    // Instances
    // =========================================================================

    /// Insert a new instance
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError>;

    /// Load an instance
    async fn get_instance(&self, instance_id: Uuid) -> Result<WorkflowInstance, StoreError>;

    /// Apply a status transition
    ///
    /// Returns `false` without writing if the instance is already Failed or
    /// Cancelled.
    async fn update_status(&self, instance_id: Uuid, update: StatusUpdate) -> Result<bool, StoreError>;

    /// Mark an instance Cancelled from any state
    async fn cancel_instance(&self, instance_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    // =========================================================================
    // Step and sleep records
    // =========================================================================

    async fn get_step(&self, instance_id: Uuid, name: &str) -> Result<Option<StepRecord>, StoreError>;

    /// Insert a step record if none exists under its name
    async fn put_step(&self, record: StepRecord) -> Result<(), StoreError>;

    async fn get_sleep(&self, instance_id: Uuid, name: &str) -> Result<Option<SleepRecord>, StoreError>;

    /// Insert a sleep record if none exists under its name
    async fn put_sleep(&self, record: SleepRecord) -> Result<(), StoreError>;

    // =========================================================================
    // Leases
    // =========================================================================

    /// Take the instance lease for `owner` until `expires_at`
    ///
    /// Succeeds when no lease is held or the held lease expired before `now`.
    async fn acquire_lease(
        &self,
        instance_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Push the lease expiry to `expires_at` if `owner` still holds it
    ///
    /// Returns `false` when another owner took the lease or it was released.
    async fn renew_lease(
        &self,
        instance_id: Uuid,
        owner: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Drop the lease if `owner` still holds it
    async fn release_lease(&self, instance_id: Uuid, owner: Uuid) -> Result<(), StoreError>;

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Instances that should be resumed now
    ///
    /// Sleeping instances whose `wake_at <= now`, plus Pending or Running
    /// instances last touched before `stale_before` (a resume that never
    /// finished). Ordered by due time, at most `limit` ids.
    async fn list_resumable(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError>;
}
