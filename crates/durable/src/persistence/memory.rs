//! In-memory implementation of WorkflowStore for testing

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;

/// In-memory implementation of WorkflowStore
///
/// This is primarily for testing and local runs. It stores all data in
/// memory and provides the same semantics as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use lifecycle_durable::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// assert_eq!(store.instance_count(), 0);
/// ```
pub struct InMemoryWorkflowStore {
    instances: RwLock<HashMap<Uuid, WorkflowInstance>>,
    steps: RwLock<HashMap<(Uuid, String), StepRecord>>,
    sleeps: RwLock<HashMap<(Uuid, String), SleepRecord>>,
}

impl InMemoryWorkflowStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
            sleeps: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of instances
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Number of step records for an instance
    pub fn count_steps(&self, instance_id: Uuid) -> usize {
        self.steps
            .read()
            .keys()
            .filter(|(id, _)| *id == instance_id)
            .count()
    }

    /// Number of sleep records for an instance
    pub fn count_sleeps(&self, instance_id: Uuid) -> usize {
        self.sleeps
            .read()
            .keys()
            .filter(|(id, _)| *id == instance_id)
            .count()
    }
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        match instances.entry(instance.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                instance_id: instance.id,
                name: "instance".to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(instance);
                Ok(())
            }
        }
    }

    async fn get_instance(&self, instance_id: Uuid) -> Result<WorkflowInstance, StoreError> {
        self.instances
            .read()
            .get(&instance_id)
            .cloned()
            .ok_or(StoreError::InstanceNotFound(instance_id))
    }

    async fn update_status(&self, instance_id: Uuid, update: StatusUpdate) -> Result<bool, StoreError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;

        if instance.status.is_terminal() {
            return Ok(false);
        }

        instance.status = update.status;
        instance.wake_at = update.wake_at;
        instance.sleep_name = update.sleep_name;
        instance.error = update.error;
        instance.updated_at = update.at;
        Ok(true)
    }

    async fn cancel_instance(&self, instance_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;

        instance.status = WorkflowStatus::Cancelled;
        instance.wake_at = None;
        instance.sleep_name = None;
        instance.updated_at = at;
        Ok(())
    }

    async fn get_step(&self, instance_id: Uuid, name: &str) -> Result<Option<StepRecord>, StoreError> {
        Ok(self
            .steps
            .read()
            .get(&(instance_id, name.to_string()))
            .cloned())
    }

    async fn put_step(&self, record: StepRecord) -> Result<(), StoreError> {
        let mut steps = self.steps.write();
        match steps.entry((record.instance_id, record.name.clone())) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                instance_id: record.instance_id,
                name: record.name,
            }),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get_sleep(&self, instance_id: Uuid, name: &str) -> Result<Option<SleepRecord>, StoreError> {
        Ok(self
            .sleeps
            .read()
            .get(&(instance_id, name.to_string()))
            .cloned())
    }

    async fn put_sleep(&self, record: SleepRecord) -> Result<(), StoreError> {
        let mut sleeps = self.sleeps.write();
        match sleeps.entry((record.instance_id, record.name.clone())) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                instance_id: record.instance_id,
                name: record.name,
            }),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn acquire_lease(
        &self,
        instance_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;

        let free = match (instance.lease_owner, instance.lease_expires_at) {
            (None, _) => true,
            (Some(_), Some(expiry)) => expiry <= now,
            (Some(_), None) => false,
        };

        if free {
            instance.lease_owner = Some(owner);
            instance.lease_expires_at = Some(expires_at);
        }
        Ok(free)
    }

    async fn renew_lease(
        &self,
        instance_id: Uuid,
        owner: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;

        if instance.lease_owner != Some(owner) {
            return Ok(false);
        }
        instance.lease_expires_at = Some(expires_at);
        Ok(true)
    }

    async fn release_lease(&self, instance_id: Uuid, owner: Uuid) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        if let Some(instance) = instances.get_mut(&instance_id) {
            if instance.lease_owner == Some(owner) {
                instance.lease_owner = None;
                instance.lease_expires_at = None;
            }
        }
        Ok(())
    }

    async fn list_resumable(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        let instances = self.instances.read();
        let mut due: Vec<(DateTime<Utc>, Uuid)> = instances
            .values()
            .filter_map(|instance| match instance.status {
                WorkflowStatus::Sleeping => instance
                    .wake_at
                    .filter(|wake_at| *wake_at <= now)
                    .map(|wake_at| (wake_at, instance.id)),
                WorkflowStatus::Pending | WorkflowStatus::Running
                    if instance.updated_at < stale_before =>
                {
                    Some((instance.updated_at, instance.id))
                }
                _ => None,
            })
            .collect();

        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowError;
    use chrono::Duration;

    async fn store_with_instance() -> (InMemoryWorkflowStore, Uuid, DateTime<Utc>) {
        let store = InMemoryWorkflowStore::new();
        let now = Utc::now();
        let instance = WorkflowInstance::new("test_workflow", serde_json::json!({"key": "value"}), now);
        let id = instance.id;
        store.create_instance(instance).await.unwrap();
        (store, id, now)
    }

    #[tokio::test]
    async fn test_create_and_get_instance() {
        let (store, id, _) = store_with_instance().await;

        let instance = store.get_instance(id).await.unwrap();
        assert_eq!(instance.status, WorkflowStatus::Pending);
        assert_eq!(instance.workflow_type, "test_workflow");
        assert_eq!(store.instance_count(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_instance() {
        let store = InMemoryWorkflowStore::new();
        let result = store.get_instance(Uuid::now_v7()).await;
        assert!(matches!(result, Err(StoreError::InstanceNotFound(_))));
    }

    #[tokio::test]
    async fn test_put_step_is_compare_and_set() {
        let (store, id, now) = store_with_instance().await;

        let first = StepRecord {
            instance_id: id,
            name: "new-signup".into(),
            result: serde_json::json!("first"),
            completed_at: now,
        };
        store.put_step(first.clone()).await.unwrap();

        let second = StepRecord {
            result: serde_json::json!("second"),
            ..first.clone()
        };
        let err = store.put_step(second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored = store.get_step(id, "new-signup").await.unwrap().unwrap();
        assert_eq!(stored.result, serde_json::json!("first"));
        assert_eq!(store.count_steps(id), 1);
    }

    #[tokio::test]
    async fn test_put_sleep_keeps_first_wake_at() {
        let (store, id, now) = store_with_instance().await;

        let record = SleepRecord {
            instance_id: id,
            name: "wait".into(),
            wake_at: now + Duration::days(3),
            created_at: now,
        };
        store.put_sleep(record.clone()).await.unwrap();

        let later = SleepRecord {
            wake_at: now + Duration::days(5),
            ..record.clone()
        };
        assert!(store.put_sleep(later).await.is_err());

        let stored = store.get_sleep(id, "wait").await.unwrap().unwrap();
        assert_eq!(stored.wake_at, record.wake_at);
        assert_eq!(store.count_sleeps(id), 1);
    }

    #[tokio::test]
    async fn test_update_status_never_overwrites_terminal() {
        let (store, id, now) = store_with_instance().await;

        assert!(store
            .update_status(id, StatusUpdate::running(now))
            .await
            .unwrap());
        assert!(store
            .update_status(id, StatusUpdate::failed(WorkflowError::new("boom"), now))
            .await
            .unwrap());
        assert!(!store
            .update_status(id, StatusUpdate::running(now))
            .await
            .unwrap());

        let instance = store.get_instance(id).await.unwrap();
        assert_eq!(instance.status, WorkflowStatus::Failed);

        // Failed -> Cancelled is still allowed
        store.cancel_instance(id, now).await.unwrap();
        let instance = store.get_instance(id).await.unwrap();
        assert_eq!(instance.status, WorkflowStatus::Cancelled);
        assert!(!store
            .update_status(id, StatusUpdate::sleeping("wait", now, now))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lease_exclusion_and_expiry() {
        let (store, id, now) = store_with_instance().await;
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        assert!(store
            .acquire_lease(id, a, now, now + Duration::seconds(30))
            .await
            .unwrap());
        assert!(!store
            .acquire_lease(id, b, now, now + Duration::seconds(30))
            .await
            .unwrap());

        // expired lease can be taken over
        let later = now + Duration::seconds(31);
        assert!(store
            .acquire_lease(id, b, later, later + Duration::seconds(30))
            .await
            .unwrap());

        // stale owner cannot release the new owner's lease
        store.release_lease(id, a).await.unwrap();
        assert_eq!(store.get_instance(id).await.unwrap().lease_owner, Some(b));

        store.release_lease(id, b).await.unwrap();
        assert_eq!(store.get_instance(id).await.unwrap().lease_owner, None);
    }

    #[tokio::test]
    async fn test_renew_lease_only_for_holder() {
        let (store, id, now) = store_with_instance().await;
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        assert!(store
            .acquire_lease(id, a, now, now + Duration::seconds(30))
            .await
            .unwrap());
        assert!(store
            .renew_lease(id, a, now + Duration::seconds(60))
            .await
            .unwrap());

        // renewed lease is still held at the original expiry
        let at_first_expiry = now + Duration::seconds(45);
        assert!(!store
            .acquire_lease(id, b, at_first_expiry, at_first_expiry + Duration::seconds(30))
            .await
            .unwrap());

        // once taken over, the previous holder cannot renew
        let later = now + Duration::seconds(61);
        assert!(store
            .acquire_lease(id, b, later, later + Duration::seconds(30))
            .await
            .unwrap());
        assert!(!store
            .renew_lease(id, a, later + Duration::seconds(60))
            .await
            .unwrap());
        assert_eq!(store.get_instance(id).await.unwrap().lease_owner, Some(b));
    }

    #[tokio::test]
    async fn test_list_resumable() {
        let store = InMemoryWorkflowStore::new();
        let now = Utc::now();

        let due = WorkflowInstance::new("w", serde_json::json!({}), now);
        let future = WorkflowInstance::new("w", serde_json::json!({}), now);
        let stale = WorkflowInstance::new("w", serde_json::json!({}), now - Duration::minutes(10));
        let fresh = WorkflowInstance::new("w", serde_json::json!({}), now);
        let cancelled = WorkflowInstance::new("w", serde_json::json!({}), now - Duration::hours(1));

        for instance in [&due, &future, &stale, &fresh, &cancelled] {
            store.create_instance(instance.clone()).await.unwrap();
        }

        store
            .update_status(due.id, StatusUpdate::sleeping("s", now - Duration::seconds(1), now))
            .await
            .unwrap();
        store
            .update_status(future.id, StatusUpdate::sleeping("s", now + Duration::days(1), now))
            .await
            .unwrap();
        store.cancel_instance(cancelled.id, now - Duration::hours(1)).await.unwrap();

        let ids = store
            .list_resumable(now, now - Duration::minutes(5), 10)
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&due.id));
        assert!(ids.contains(&stale.id));

        let limited = store
            .list_resumable(now, now - Duration::minutes(5), 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
