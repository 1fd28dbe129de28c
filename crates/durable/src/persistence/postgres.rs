//! PostgreSQL implementation of WorkflowStore
//!
//! Production persistence using PostgreSQL with:
//! - Compare-and-set step/sleep records via `ON CONFLICT DO NOTHING`
//! - Conditional updates for status transitions and leases
//! - Partial indexes for the wake and stale sweeps

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::workflow::WorkflowError;

/// PostgreSQL implementation of WorkflowStore
///
/// # Example
///
/// ```ignore
/// use lifecycle_durable::PostgresWorkflowStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/lifecycle").await?;
/// let store = PostgresWorkflowStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }

    async fn exists(&self, instance_id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM durable_workflow_instances WHERE id = $1")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("check instance"))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[instrument(skip(self, instance), fields(instance_id = %instance.id))]
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError> {
        let error = instance
            .error
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO durable_workflow_instances
                (id, workflow_type, input, status, wake_at, sleep_name, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(instance.id)
        .bind(&instance.workflow_type)
        .bind(&instance.input)
        .bind(instance.status.as_str())
        .bind(instance.wake_at)
        .bind(&instance.sleep_name)
        .bind(&error)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("create instance"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                instance_id: instance.id,
                name: "instance".to_string(),
            });
        }

        debug!(workflow_type = %instance.workflow_type, "created workflow instance");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_instance(&self, instance_id: Uuid) -> Result<WorkflowInstance, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_type, input, status, wake_at, sleep_name, error,
                   created_at, updated_at, lease_owner, lease_expires_at
            FROM durable_workflow_instances
            WHERE id = $1
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get instance"))?
        .ok_or(StoreError::InstanceNotFound(instance_id))?;

        row_to_instance(&row)
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn update_status(&self, instance_id: Uuid, update: StatusUpdate) -> Result<bool, StoreError> {
        let error = update
            .error
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE durable_workflow_instances
            SET status = $2, wake_at = $3, sleep_name = $4, error = $5, updated_at = $6
            WHERE id = $1 AND status NOT IN ('failed', 'cancelled')
            "#,
        )
        .bind(instance_id)
        .bind(update.status.as_str())
        .bind(update.wake_at)
        .bind(&update.sleep_name)
        .bind(&error)
        .bind(update.at)
        .execute(&self.pool)
        .await
        .map_err(db_error("update status"))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.exists(instance_id).await? {
            Ok(false)
        } else {
            Err(StoreError::InstanceNotFound(instance_id))
        }
    }

    #[instrument(skip(self))]
    async fn cancel_instance(&self, instance_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE durable_workflow_instances
            SET status = 'cancelled', wake_at = NULL, sleep_name = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(instance_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error("cancel instance"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InstanceNotFound(instance_id));
        }
        Ok(())
    }

    async fn get_step(&self, instance_id: Uuid, name: &str) -> Result<Option<StepRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT result, completed_at
            FROM durable_step_records
            WHERE instance_id = $1 AND step_name = $2
            "#,
        )
        .bind(instance_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get step"))?;

        Ok(row.map(|row| StepRecord {
            instance_id,
            name: name.to_string(),
            result: row.get("result"),
            completed_at: row.get("completed_at"),
        }))
    }

    #[instrument(skip(self, record), fields(instance_id = %record.instance_id, step = %record.name))]
    async fn put_step(&self, record: StepRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO durable_step_records (instance_id, step_name, result, completed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (instance_id, step_name) DO NOTHING
            "#,
        )
        .bind(record.instance_id)
        .bind(&record.name)
        .bind(&record.result)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("put step"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                instance_id: record.instance_id,
                name: record.name,
            });
        }
        Ok(())
    }

    async fn get_sleep(&self, instance_id: Uuid, name: &str) -> Result<Option<SleepRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT wake_at, created_at
            FROM durable_sleep_records
            WHERE instance_id = $1 AND sleep_name = $2
            "#,
        )
        .bind(instance_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get sleep"))?;

        Ok(row.map(|row| SleepRecord {
            instance_id,
            name: name.to_string(),
            wake_at: row.get("wake_at"),
            created_at: row.get("created_at"),
        }))
    }

    #[instrument(skip(self, record), fields(instance_id = %record.instance_id, sleep = %record.name))]
    async fn put_sleep(&self, record: SleepRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO durable_sleep_records (instance_id, sleep_name, wake_at, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (instance_id, sleep_name) DO NOTHING
            "#,
        )
        .bind(record.instance_id)
        .bind(&record.name)
        .bind(record.wake_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("put sleep"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                instance_id: record.instance_id,
                name: record.name,
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn acquire_lease(
        &self,
        instance_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE durable_workflow_instances
            SET lease_owner = $2, lease_expires_at = $4
            WHERE id = $1
              AND (lease_owner IS NULL OR lease_expires_at <= $3)
            "#,
        )
        .bind(instance_id)
        .bind(owner)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("acquire lease"))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.exists(instance_id).await? {
            Ok(false)
        } else {
            Err(StoreError::InstanceNotFound(instance_id))
        }
    }

    #[instrument(skip(self))]
    async fn renew_lease(
        &self,
        instance_id: Uuid,
        owner: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE durable_workflow_instances
            SET lease_expires_at = $3
            WHERE id = $1 AND lease_owner = $2
            "#,
        )
        .bind(instance_id)
        .bind(owner)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("renew lease"))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.exists(instance_id).await? {
            Ok(false)
        } else {
            Err(StoreError::InstanceNotFound(instance_id))
        }
    }

    #[instrument(skip(self))]
    async fn release_lease(&self, instance_id: Uuid, owner: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE durable_workflow_instances
            SET lease_owner = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_owner = $2
            "#,
        )
        .bind(instance_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(db_error("release lease"))?;
        Ok(())
    }

    async fn list_resumable(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM (
                SELECT id, wake_at AS due_at
                FROM durable_workflow_instances
                WHERE status = 'sleeping' AND wake_at <= $1
                UNION ALL
                SELECT id, updated_at AS due_at
                FROM durable_workflow_instances
                WHERE status IN ('pending', 'running') AND updated_at < $2
            ) due
            ORDER BY due_at
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(stale_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list resumable"))?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }
}

fn db_error(operation: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("Failed to {}: {}", operation, e);
        StoreError::Database(e.to_string())
    }
}

fn row_to_instance(row: &PgRow) -> Result<WorkflowInstance, StoreError> {
    let status: String = row.get("status");
    let error: Option<serde_json::Value> = row.get("error");
    let error = error
        .map(serde_json::from_value::<WorkflowError>)
        .transpose()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(WorkflowInstance {
        id: row.get("id"),
        workflow_type: row.get("workflow_type"),
        input: row.get("input"),
        status: WorkflowStatus::parse(&status)?,
        wake_at: row.get("wake_at"),
        sleep_name: row.get("sleep_name"),
        error,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        lease_owner: row.get("lease_owner"),
        lease_expires_at: row.get("lease_expires_at"),
    })
}
