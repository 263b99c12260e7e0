use super::{PoolStore, StoreError, StoreResult, TeardownTask};
use async_trait::async_trait;
use neptune_common::{Credential, InstanceRecord, InstanceState};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, InstanceRecord>,
    resource_ids: HashMap<String, String>,
    teardowns: BTreeMap<String, TeardownTask>,
}

/// Process-local store for tests and single-node development. Every
/// operation runs under one lock, which gives the same atomicity the
/// Postgres store gets from conditional updates.
#[derive(Default)]
pub struct MemoryPoolStore {
    inner: Mutex<Inner>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, name order.
    pub async fn records(&self) -> Vec<InstanceRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }

    /// Insert a record as-is, bypassing the Provisioning-only rule of
    /// [`PoolStore::insert`]. Lets tests seed arbitrary pools.
    pub async fn seed(&self, record: InstanceRecord) {
        self.inner
            .lock()
            .await
            .records
            .insert(record.name.clone(), record);
    }
}

fn oldest_first(mut records: Vec<InstanceRecord>) -> Vec<InstanceRecord> {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
    records
}

#[async_trait]
impl PoolStore for MemoryPoolStore {
    async fn insert(&self, record: &InstanceRecord, cluster_resource_id: Option<&str>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.records.contains_key(&record.name) {
            return Err(StoreError::Duplicate(record.name.clone()));
        }
        let mut record = record.clone();
        record.state = InstanceState::Provisioning;
        record.billing_code = None;
        if let Some(id) = cluster_resource_id {
            inner.resource_ids.insert(record.name.clone(), id.to_string());
        }
        inner.records.insert(record.name.clone(), record);
        Ok(())
    }

    async fn get(&self, name: &str) -> StoreResult<Option<InstanceRecord>> {
        Ok(self.inner.lock().await.records.get(name).cloned())
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().await.records.contains_key(name))
    }

    async fn count_capacity(&self, plan: &str) -> StoreResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.plan == plan && r.state.counts_as_capacity())
            .count() as u64)
    }

    async fn pending_endpoints(&self) -> StoreResult<Vec<InstanceRecord>> {
        let inner = self.inner.lock().await;
        Ok(oldest_first(
            inner
                .records
                .values()
                .filter(|r| r.state.counts_as_capacity() && !r.has_endpoint())
                .cloned()
                .collect(),
        ))
    }

    async fn awaiting_credentials(&self) -> StoreResult<Vec<InstanceRecord>> {
        let inner = self.inner.lock().await;
        Ok(oldest_first(
            inner
                .records
                .values()
                .filter(|r| r.awaiting_credential())
                .cloned()
                .collect(),
        ))
    }

    async fn cluster_resource_id(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().await.resource_ids.get(name).cloned())
    }

    async fn set_endpoint(&self, name: &str, endpoint: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(name) else {
            return Ok(false);
        };
        if !record.state.counts_as_capacity() || record.has_endpoint() || endpoint.is_empty() {
            return Ok(false);
        }
        record.endpoint = Some(endpoint.to_string());
        record.state = record.derived_unclaimed_state();
        Ok(true)
    }

    async fn set_credential(&self, name: &str, credential: &Credential) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(name) else {
            return Ok(false);
        };
        if !record.state.counts_as_capacity() || !credential.is_complete() {
            return Ok(false);
        }
        record.credential = Some(credential.clone());
        record.state = record.derived_unclaimed_state();
        Ok(true)
    }

    async fn claim_oldest(&self, plan: &str, billing_code: &str) -> StoreResult<Option<InstanceRecord>> {
        let mut inner = self.inner.lock().await;
        let chosen = inner
            .records
            .values()
            .filter(|r| r.plan == plan && r.state == InstanceState::Available)
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)))
            .map(|r| r.name.clone());
        let Some(name) = chosen else {
            return Ok(None);
        };
        let record = inner
            .records
            .get_mut(&name)
            .map(|r| {
                r.state = InstanceState::Claimed;
                r.billing_code = Some(billing_code.to_string());
                r.clone()
            });
        Ok(record)
    }

    async fn mark_deleting(&self, name: &str) -> StoreResult<Option<InstanceRecord>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        match inner.records.get_mut(name) {
            Some(r) if r.state != InstanceState::Deleting => {
                let before = r.clone();
                r.state = InstanceState::Deleting;
                inner
                    .teardowns
                    .entry(name.to_string())
                    .or_insert_with(|| TeardownTask::new(name));
                Ok(Some(before))
            }
            _ => Ok(None),
        }
    }

    async fn remove(&self, name: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.resource_ids.remove(name);
        Ok(inner.records.remove(name).is_some())
    }

    async fn save_teardown(&self, task: &TeardownTask) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .teardowns
            .insert(task.name.clone(), task.clone());
        Ok(())
    }

    async fn pending_teardowns(&self) -> StoreResult<Vec<TeardownTask>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<TeardownTask> = inner.teardowns.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn remove_teardown(&self, name: &str) -> StoreResult<()> {
        self.inner.lock().await.teardowns.remove(name);
        Ok(())
    }
}
